//! Transform-domain multiply-accumulate micro-kernels with NEON acceleration
//! and scalar fallbacks.

use num_complex::Complex32;

// ── FP32 pointwise FMA: acc[i] += a[i] * b[i] ──

#[cfg(all(target_arch = "aarch64", feature = "simd"))]
pub fn fma_f32(acc: &mut [f32], a: &[f32], b: &[f32]) {
    use core::arch::aarch64::*;
    let len = acc.len().min(a.len()).min(b.len());
    let mut j = 0usize;
    unsafe {
        while j + 4 <= len {
            let a_vec = vld1q_f32(a.as_ptr().add(j));
            let b_vec = vld1q_f32(b.as_ptr().add(j));
            let c_vec = vld1q_f32(acc.as_ptr().add(j));
            vst1q_f32(acc.as_mut_ptr().add(j), vfmaq_f32(c_vec, a_vec, b_vec));
            j += 4;
        }
    }
    // scalar tail
    while j < len {
        acc[j] += a[j] * b[j];
        j += 1;
    }
}

#[cfg(not(all(target_arch = "aarch64", feature = "simd")))]
pub fn fma_f32(acc: &mut [f32], a: &[f32], b: &[f32]) {
    for ((c, &x), &y) in acc.iter_mut().zip(a).zip(b) {
        *c += x * y;
    }
}

// ── Complex pointwise MAC: acc[i] += a[i] * b[i] ──
//
// Split into real and imaginary FMAs so the compiler can vectorize the
// interleaved layout without a shuffle.

pub fn cmac(acc: &mut [Complex32], a: &[Complex32], b: &[Complex32]) {
    for ((c, x), y) in acc.iter_mut().zip(a).zip(b) {
        c.re += x.re * y.re - x.im * y.im;
        c.im += x.re * y.im + x.im * y.re;
    }
}
