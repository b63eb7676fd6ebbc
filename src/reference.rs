/// Golden model for checking simulated results

/// Naive `C = A·W` over row-major slices, with A `k1`×`k2` and W `k2`×`k3`.
pub fn matmul(a: &[f32], w: &[f32], k1: usize, k2: usize, k3: usize) -> Vec<f32> {
  assert_eq!(a.len(), k1 * k2, "A is not {}x{}", k1, k2);
  assert_eq!(w.len(), k2 * k3, "W is not {}x{}", k2, k3);

  let mut c = vec![0.0; k1 * k3];
  for i in 0..k1 {
    for j in 0..k3 {
      let mut sum = 0.0;
      for k in 0..k2 {
        sum += a[i * k2 + k] * w[k * k3 + j];
      }
      c[i * k3 + j] = sum;
    }
  }
  c
}

/// Largest element-wise absolute difference. Panics on length mismatch.
pub fn max_abs_diff(x: &[f32], y: &[f32]) -> f32 {
  assert_eq!(x.len(), y.len(), "length mismatch");
  x.iter().zip(y).map(|(a, b)| (a - b).abs()).fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_matmul_2x2() {
    let c = matmul(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2);
    assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
  }

  #[test]
  fn test_matmul_rectangular() {
    // [1 2 3] · [1 2 3]^T
    assert_eq!(matmul(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 1, 3, 1), vec![14.0]);
    assert_eq!(matmul(&[1.0, 2.0], &[3.0, 4.0], 2, 1, 2), vec![3.0, 4.0, 6.0, 8.0]);
  }

  #[test]
  fn test_max_abs_diff() {
    assert_eq!(max_abs_diff(&[1.0, -2.0], &[1.5, -4.0]), 2.0);
    assert_eq!(max_abs_diff(&[], &[]), 0.0);
  }
}
