//! Euclidean geometry primitives on candle tensors.
//!
//! All functions are differentiable: they are compositions of candle ops, so
//! gradients flow through them during training.
//!
//! | Function | Input shapes | Output |
//! |----------|--------------|--------|
//! | [`euclidean_sq_distance`] (`all_pairs = false`) | `B x d`, `B x d` | `B x 1` |
//! | [`euclidean_sq_distance`] (`all_pairs = true`) | `B x d`, `N x d` | `B x N` |
//! | [`euclidean_sq_distance_batched_all_pairs`] | `B x d`, `B x N x d` | `B x N` |
//! | [`givens_rotations`] / [`givens_reflection`] | `B x d`, `B x d` | `B x d` |

use crate::error::{Error, Result};
use candle_core::{Tensor, D};

/// Guards the pair normalization in the Givens transforms.
const MIN_NORM: f64 = 1e-15;

/// Squared Euclidean distance.
///
/// With `all_pairs = false`, `x` and `y` are row-aligned (`B x d`) and the
/// result is `B x 1`. With `all_pairs = true`, every row of `x` (`B x d`) is
/// compared with every row of `y` (`N x d`) and the result is `B x N`.
pub fn euclidean_sq_distance(x: &Tensor, y: &Tensor, all_pairs: bool) -> Result<Tensor> {
    if all_pairs {
        // |x|^2 + |y|^2 - 2<x, y>, clamped at zero against cancellation.
        let x2 = x.sqr()?.sum_keepdim(D::Minus1)?;
        let y2 = y.sqr()?.sum_keepdim(D::Minus1)?.t()?;
        let xy = x.matmul(&y.t()?)?;
        let dist = x2.broadcast_add(&y2)?.sub(&xy.affine(2.0, 0.0)?)?;
        Ok(dist.relu()?)
    } else {
        Ok((x - y)?.sqr()?.sum_keepdim(D::Minus1)?)
    }
}

/// Squared Euclidean distance between each query and its own candidate set.
///
/// `x` is `B x d`, `y` is `B x N x d`; the result is `B x N`.
pub fn euclidean_sq_distance_batched_all_pairs(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let diff = x.unsqueeze(1)?.broadcast_sub(y)?;
    Ok(diff.sqr()?.sum(D::Minus1)?)
}

/// Splits `r` and `x` (`B x d`) into `B x d/2 x 2` pairs, with `r` pairs
/// normalized to unit length.
fn givens_pairs(r: &Tensor, x: &Tensor) -> Result<(Tensor, Tensor)> {
    let (batch, dim) = r.dims2()?;
    if dim % 2 != 0 {
        return Err(Error::Validation(format!(
            "Givens transforms need an even dimension, got {}",
            dim
        )));
    }
    let x_dim = x.dim(D::Minus1)?;
    if x_dim != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            got: x_dim,
        });
    }

    let g = r.reshape((batch, dim / 2, 2))?;
    let norm = (g.sqr()?.sum_keepdim(D::Minus1)?.sqrt()? + MIN_NORM)?;
    let g = g.broadcast_div(&norm)?;
    let x = x.reshape((batch, dim / 2, 2))?;
    Ok((g, x))
}

/// Rotates each consecutive pair of `x` by the angle encoded in `r`.
///
/// Pair `(r_2i, r_2i+1)` is normalized to `(cos θ, sin θ)` and applied as
/// the 2x2 rotation `[[cos, -sin], [sin, cos]]`. Norms are preserved.
pub fn givens_rotations(r: &Tensor, x: &Tensor) -> Result<Tensor> {
    let (batch, dim) = r.dims2()?;
    let (g, x) = givens_pairs(r, x)?;
    let cos = g.narrow(D::Minus1, 0, 1)?;
    let sin = g.narrow(D::Minus1, 1, 1)?;
    let x0 = x.narrow(D::Minus1, 0, 1)?;
    let x1 = x.narrow(D::Minus1, 1, 1)?;

    let swapped = Tensor::cat(&[&x1.neg()?, &x0], D::Minus1)?;
    let rotated = (x.broadcast_mul(&cos)? + swapped.broadcast_mul(&sin)?)?;
    Ok(rotated.reshape((batch, dim))?)
}

/// Reflects each consecutive pair of `x` using the 2x2 reflection
/// `[[cos, sin], [sin, -cos]]` built from the normalized pair of `r`.
///
/// Applying the same reflection twice is the identity.
pub fn givens_reflection(r: &Tensor, x: &Tensor) -> Result<Tensor> {
    let (batch, dim) = r.dims2()?;
    let (g, x) = givens_pairs(r, x)?;
    let cos = g.narrow(D::Minus1, 0, 1)?;
    let sin = g.narrow(D::Minus1, 1, 1)?;
    let x0 = x.narrow(D::Minus1, 0, 1)?;
    let x1 = x.narrow(D::Minus1, 1, 1)?;

    let flipped = Tensor::cat(&[&x0, &x1.neg()?], D::Minus1)?;
    let swapped = Tensor::cat(&[&x1, &x0], D::Minus1)?;
    let reflected = (flipped.broadcast_mul(&cos)? + swapped.broadcast_mul(&sin)?)?;
    Ok(reflected.reshape((batch, dim))?)
}

/// Numerically stable `log(1 + exp(x))`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let linear = x.relu()?;
    let correction = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((linear + correction)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn test_sq_distance_pairwise() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 2.0], [0.0, 0.0]], &dev).unwrap();
        let y = Tensor::new(&[[1f32, 0.0], [3.0, 4.0]], &dev).unwrap();

        let d = euclidean_sq_distance(&x, &y, false).unwrap();
        assert_eq!(d.dims(), &[2, 1]);
        let d = d.to_vec2::<f32>().unwrap();
        assert_close(d[0][0], 4.0);
        assert_close(d[1][0], 25.0);
    }

    #[test]
    fn test_sq_distance_all_pairs() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 2.0], [0.0, 0.0]], &dev).unwrap();
        let y = Tensor::new(&[[1f32, 0.0], [3.0, 4.0], [1.0, 2.0]], &dev).unwrap();

        let d = euclidean_sq_distance(&x, &y, true).unwrap();
        assert_eq!(d.dims(), &[2, 3]);
        let d = d.to_vec2::<f32>().unwrap();
        assert_close(d[0][0], 4.0);
        assert_close(d[0][1], 8.0);
        assert_close(d[0][2], 0.0);
        assert_close(d[1][0], 1.0);
        assert_close(d[1][1], 25.0);
        assert_close(d[1][2], 5.0);
    }

    #[test]
    fn test_batched_all_pairs_matches_unbatched() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 2.0], [0.5, -1.0]], &dev).unwrap();
        let items = Tensor::new(&[[1f32, 0.0], [3.0, 4.0], [1.0, 2.0]], &dev).unwrap();
        let y = Tensor::stack(&[&items, &items], 0).unwrap();

        let batched = euclidean_sq_distance_batched_all_pairs(&x, &y).unwrap();
        let flat = euclidean_sq_distance(&x, &items, true).unwrap();
        assert_eq!(batched.dims(), &[2, 3]);

        let a = batched.to_vec2::<f32>().unwrap();
        let b = flat.to_vec2::<f32>().unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert_close(*va, *vb);
            }
        }
    }

    #[test]
    fn test_rotation_by_90_degrees() {
        let dev = Device::Cpu;
        // (0, 2) normalizes to (cos 90, sin 90)
        let r = Tensor::new(&[[0f32, 2.0]], &dev).unwrap();
        let x = Tensor::new(&[[1f32, 0.0]], &dev).unwrap();

        let rotated = givens_rotations(&r, &x).unwrap().to_vec2::<f32>().unwrap();
        assert_close(rotated[0][0], 0.0);
        assert_close(rotated[0][1], 1.0);
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let dev = Device::Cpu;
        let r = Tensor::new(&[[0.3f32, -0.7, 1.5, 0.2]], &dev).unwrap();
        let x = Tensor::new(&[[1f32, 2.0, -3.0, 0.5]], &dev).unwrap();

        let before = x.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        let after = givens_rotations(&r, &x)
            .unwrap()
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_close(before, after);
    }

    #[test]
    fn test_reflection_is_involution() {
        let dev = Device::Cpu;
        let r = Tensor::new(&[[0.3f32, -0.7, 1.5, 0.2]], &dev).unwrap();
        let x = Tensor::new(&[[1f32, 2.0, -3.0, 0.5]], &dev).unwrap();

        let twice = givens_reflection(&r, &givens_reflection(&r, &x).unwrap()).unwrap();
        let twice = twice.to_vec2::<f32>().unwrap();
        let orig = x.to_vec2::<f32>().unwrap();
        for (a, b) in twice[0].iter().zip(orig[0].iter()) {
            assert_close(*a, *b);
        }
    }

    #[test]
    fn test_givens_rejects_odd_dim() {
        let dev = Device::Cpu;
        let r = Tensor::new(&[[1f32, 0.0, 1.0]], &dev).unwrap();
        let x = Tensor::new(&[[1f32, 0.0, 1.0]], &dev).unwrap();
        assert!(givens_rotations(&r, &x).is_err());
    }

    #[test]
    fn test_softplus() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[-50f32, 0.0, 50.0], &dev).unwrap();
        let y = softplus(&x).unwrap().to_vec1::<f32>().unwrap();
        assert_close(y[0], 0.0);
        assert_close(y[1], std::f32::consts::LN_2);
        assert_close(y[2], 50.0);
    }
}
