use rustfft::num_complex::Complex32;
use rustfft::Fft;
use std::sync::Arc;

/// Transpose an `n x n` matrix stored row-major, in place.
pub fn transpose_square(buf: &mut [Complex32], n: usize) {
    for r in 0..n {
        for c in (r + 1)..n {
            buf.swap(r * n + c, c * n + r);
        }
    }
}

/// Separable box blur with running sums, radius `r`, O(n^2) total work.
pub fn box_blur_separable(buf: &mut [f32], n: usize, radius: usize) {
    let mut tmp = vec![0.0f32; n * n];
    box_blur_rows(buf, &mut tmp, n, radius);
    transpose_real(&mut tmp, n);
    let mut tmp2 = vec![0.0f32; n * n];
    box_blur_rows(&tmp, &mut tmp2, n, radius);
    transpose_real(&mut tmp2, n);
    buf.copy_from_slice(&tmp2);
}

fn transpose_real(buf: &mut [f32], n: usize) {
    for r in 0..n {
        for c in (r + 1)..n {
            buf.swap(r * n + c, c * n + r);
        }
    }
}

fn box_blur_rows(src: &[f32], dst: &mut [f32], n: usize, radius: usize) {
    let window = (2 * radius + 1) as f32;
    for row in 0..n {
        let base = row * n;
        let mut sum = 0.0f32;
        for i in 0..=radius.min(n - 1) {
            sum += src[base + i];
        }
        for col in 0..n {
            dst[base + col] = sum / window;
            let add_idx = col + radius + 1;
            let sub_idx = col as isize - radius as isize;
            if add_idx < n {
                sum += src[base + add_idx];
            }
            if sub_idx >= 0 {
                sum -= src[base + sub_idx as usize];
            }
        }
    }
}

/// Forward 2D FFT of a real `n x n` image via row/column separability.
pub fn fft2d_forward(input: &[f32], n: usize, plan: &Arc<dyn Fft<f32>>) -> Vec<Complex32> {
    let mut buf: Vec<Complex32> = input.iter().map(|&v| Complex32::new(v, 0.0)).collect();
    run_rows(&mut buf, n, plan);
    transpose_square(&mut buf, n);
    run_rows(&mut buf, n, plan);
    transpose_square(&mut buf, n);
    buf
}

/// Inverse 2D FFT, normalising by `1/(n*n)` (rustfft does not normalise).
pub fn fft2d_inverse(buf: &mut [Complex32], n: usize, plan: &Arc<dyn Fft<f32>>) {
    run_rows(buf, n, plan);
    transpose_square(buf, n);
    run_rows(buf, n, plan);
    transpose_square(buf, n);
    let scale = 1.0 / (n * n) as f32;
    for v in buf.iter_mut() {
        *v *= scale;
    }
}

fn run_rows(buf: &mut [Complex32], n: usize, plan: &Arc<dyn Fft<f32>>) {
    for row in 0..n {
        plan.process(&mut buf[row * n..row * n + n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    #[test]
    fn forward_then_inverse_round_trips() {
        let n = 16;
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n);
        let inv = planner.plan_fft_inverse(n);

        let input: Vec<f32> = (0..n * n).map(|i| (i % 7) as f32).collect();
        let mut spectrum = fft2d_forward(&input, n, &fwd);
        fft2d_inverse(&mut spectrum, n, &inv);

        for (orig, recovered) in input.iter().zip(spectrum.iter()) {
            assert!((orig - recovered.re).abs() < 1e-2, "{orig} vs {recovered:?}");
        }
    }

    #[test]
    fn box_blur_preserves_constant_image() {
        let n = 32;
        let mut buf = vec![5.0f32; n * n];
        box_blur_separable(&mut buf, n, 8);
        assert!(buf.iter().all(|&v| (v - 5.0).abs() < 1e-4));
    }
}
