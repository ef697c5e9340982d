//! Direct nested-loop convolution (reference implementation).
//!
//! Operates on plain `f32` slices in NCHW layout with implicit zero padding.
//! Used to check the transform-domain algorithms and as a baseline in benches.

use crate::tensor::Padding;

#[inline]
fn padded_index(out: usize, k: usize, pad: usize, extent: usize) -> Option<usize> {
    (out + k).checked_sub(pad).filter(|&i| i < extent)
}

/// Forward convolution: `output[n][oc] = sum_ic corr(pad(input[n][ic]), weights[oc][ic]) + bias[oc]`.
pub fn conv2d_naive(
    input: &[f32],
    batch: usize,
    in_channels: usize,
    in_h: usize,
    in_w: usize,
    padding: Padding,
    weights: &[f32],
    kernel_h: usize,
    kernel_w: usize,
    bias: &[f32],
    out_channels: usize,
    out_h: usize,
    out_w: usize,
    output: &mut [f32],
) {
    for n in 0..batch {
        for oc in 0..out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = 0.0f32;
                    for ic in 0..in_channels {
                        for kh in 0..kernel_h {
                            let Some(ih) = padded_index(oh, kh, padding.top, in_h) else { continue };
                            for kw in 0..kernel_w {
                                let Some(iw) = padded_index(ow, kw, padding.left, in_w) else { continue };
                                let in_idx = ((n * in_channels + ic) * in_h + ih) * in_w + iw;
                                let w_idx = ((oc * in_channels + ic) * kernel_h + kh) * kernel_w + kw;
                                sum += input[in_idx] * weights[w_idx];
                            }
                        }
                    }
                    output[((n * out_channels + oc) * out_h + oh) * out_w + ow] = sum + bias[oc];
                }
            }
        }
    }
}

/// Gradient with respect to the input, scattering every output gradient
/// element back through the kernel window it was computed from.
pub fn conv2d_input_gradient_naive(
    grad_output: &[f32],
    batch: usize,
    in_channels: usize,
    in_h: usize,
    in_w: usize,
    padding: Padding,
    weights: &[f32],
    kernel_h: usize,
    kernel_w: usize,
    out_channels: usize,
    out_h: usize,
    out_w: usize,
    grad_input: &mut [f32],
) {
    grad_input.fill(0.0);
    for n in 0..batch {
        for oc in 0..out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let g = grad_output[((n * out_channels + oc) * out_h + oh) * out_w + ow];
                    for ic in 0..in_channels {
                        for kh in 0..kernel_h {
                            let Some(ih) = padded_index(oh, kh, padding.top, in_h) else { continue };
                            for kw in 0..kernel_w {
                                let Some(iw) = padded_index(ow, kw, padding.left, in_w) else { continue };
                                let w_idx = ((oc * in_channels + ic) * kernel_h + kh) * kernel_w + kw;
                                grad_input[((n * in_channels + ic) * in_h + ih) * in_w + iw] += g * weights[w_idx];
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Gradient with respect to the kernel, summed over the batch.
pub fn conv2d_kernel_gradient_naive(
    input: &[f32],
    batch: usize,
    in_channels: usize,
    in_h: usize,
    in_w: usize,
    padding: Padding,
    grad_output: &[f32],
    kernel_h: usize,
    kernel_w: usize,
    out_channels: usize,
    out_h: usize,
    out_w: usize,
    grad_kernel: &mut [f32],
) {
    for oc in 0..out_channels {
        for ic in 0..in_channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let mut sum = 0.0f32;
                    for n in 0..batch {
                        for oh in 0..out_h {
                            let Some(ih) = padded_index(oh, kh, padding.top, in_h) else { continue };
                            for ow in 0..out_w {
                                let Some(iw) = padded_index(ow, kw, padding.left, in_w) else { continue };
                                let g = grad_output[((n * out_channels + oc) * out_h + oh) * out_w + ow];
                                sum += g * input[((n * in_channels + ic) * in_h + ih) * in_w + iw];
                            }
                        }
                    }
                    grad_kernel[((oc * in_channels + ic) * kernel_h + kh) * kernel_w + kw] = sum;
                }
            }
        }
    }
}
