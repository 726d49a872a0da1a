use std::sync::OnceLock;

/// Precomputed separable Hann window, `w(n) = 0.5(1 - cos(2*pi*n/(N-1)))`.
/// Built once and shared process-wide.
pub fn hann_lut(n: usize) -> &'static [f32] {
    static LUT: OnceLock<Vec<f32>> = OnceLock::new();
    LUT.get_or_init(|| {
        (0..n)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n as f32 - 1.0)).cos())
            })
            .collect()
    })
}
