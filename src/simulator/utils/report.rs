use crate::arch::RunReport;
use crate::log_info;

const MAX_ROWS: usize = 5;
const MAX_COLS: usize = 10;
const MAX_MISMATCHES: usize = 10;

/// Render the top-left corner of a row-major matrix.
pub fn format_matrix(name: &str, data: &[f32], rows: usize, cols: usize) -> String {
  let mut out = format!("{} ({}x{}):\n", name, rows, cols);
  for r in 0..rows.min(MAX_ROWS) {
    out.push_str("  ");
    for c in 0..cols.min(MAX_COLS) {
      out.push_str(&format!("{:>10.4} ", data[r * cols + c]));
    }
    if cols > MAX_COLS {
      out.push_str("...");
    }
    out.push('\n');
  }
  if rows > MAX_ROWS {
    out.push_str("  ...\n");
  }
  out
}

pub fn print_matrix(name: &str, data: &[f32], rows: usize, cols: usize) {
  print!("{}", format_matrix(name, data, rows, cols));
}

pub fn print_run_report(report: &RunReport) {
  println!("\n--- Run Report ---");
  println!("{}", report);
  println!("--- End Report ---\n");
}

/// Compare `actual` against `expected`, printing the first few mismatches.
///
/// # Returns
/// Number of elements further than `tolerance` from the reference.
pub fn verify_result(expected: &[f32], actual: &[f32], cols: usize, tolerance: f32) -> usize {
  let mut mismatches = 0;
  for (idx, (e, a)) in expected.iter().zip(actual).enumerate() {
    let diff = (e - a).abs();
    if diff > tolerance {
      if mismatches < MAX_MISMATCHES {
        println!(
          "Mismatch at C[{}][{}]: expected {}, got {} (diff: {})",
          idx / cols,
          idx % cols,
          e,
          a,
          diff
        );
      }
      mismatches += 1;
    }
  }
  if mismatches == 0 {
    log_info!("verified {} elements within {}", expected.len(), tolerance);
  }
  mismatches
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_matrix_truncates() {
    let data: Vec<f32> = (0..12 * 12).map(|v| v as f32).collect();
    let text = format_matrix("C", &data, 12, 12);
    assert!(text.starts_with("C (12x12):"));
    // header + 5 rows + ellipsis row
    assert_eq!(text.lines().count(), 7);
    assert!(text.lines().nth(1).unwrap().ends_with("..."));
  }

  #[test]
  fn test_verify_counts_mismatches() {
    let expected = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(verify_result(&expected, &[1.0, 2.0005, 3.0, 4.0], 2, 1e-3), 0);
    assert_eq!(verify_result(&expected, &[1.0, 2.1, 3.0, 5.0], 2, 1e-3), 2);
  }
}
