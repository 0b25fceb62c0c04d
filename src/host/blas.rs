//! BLAS-style linear algebra over buffer windows.
//!
//! The call surface is the classic row-major BLAS parameter convention:
//! `(trans, m, n, k, alpha, buffer, offset, leading-dimension, beta, ...)`.
//! Each matrix argument addresses a window of its buffer; the window is
//! validated against the actual buffer length before any element is touched.
//!
//! `gemm` has a native implementation (faer) selected by the backend's
//! compute mode; the pure and native paths produce identical results.

use super::{numeric_dispatch, HostMath};
use crate::buffer::{Buffer, Element, NumElement};
use crate::dtype::DType;
use crate::{Error, NDArray, Result};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Which triangle of the output `syrk` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uplo {
    Upper,
    Lower,
}

/// Rows below which parallelizing the pure gemm is not worth the overhead.
#[cfg(feature = "parallel")]
const PAR_GEMM_MIN_ROWS: usize = 64;

/// Validate a `rows x cols` window at `offset` with leading dimension `ld`.
fn check_window(
    buf: &Buffer,
    offset: usize,
    rows: usize,
    cols: usize,
    ld: usize,
    which: char,
) -> Result<()> {
    if cols > 0 && ld < cols {
        return Err(Error::InvalidArgument(format!(
            "leading dimension {ld} smaller than row length {cols} for buffer {which}"
        )));
    }
    if rows > 0 && offset + (rows - 1) * ld + cols > buf.count() {
        return Err(Error::MatrixOverBuffer { which });
    }
    Ok(())
}

fn check_same_dtype(a: &Buffer, b: &Buffer, c: &Buffer) -> Result<DType> {
    if a.dtype() != b.dtype() || a.dtype() != c.dtype() {
        return Err(Error::InvalidArgument(format!(
            "mismatched dtypes {} / {} / {} for BLAS call",
            a.dtype(),
            b.dtype(),
            c.dtype()
        )));
    }
    Ok(a.dtype())
}

/// Copy the logical `lrows x lcols` matrix out of a stored window, applying
/// the transpose flag, into a packed row-major vector.
fn pack<T: Element>(
    buf: &Buffer,
    offset: usize,
    ld: usize,
    lrows: usize,
    lcols: usize,
    trans: bool,
) -> Result<Vec<T>> {
    let cells = buf.read();
    let slice = T::slice(&cells).ok_or(Error::UnsupportedDtype {
        op: "blas",
        dtype: buf.dtype(),
    })?;
    let mut out = Vec::with_capacity(lrows * lcols);
    for i in 0..lrows {
        for j in 0..lcols {
            let (r, c) = if trans { (j, i) } else { (i, j) };
            out.push(slice[offset + r * ld + c]);
        }
    }
    Ok(out)
}

/// Pure gemm kernel over a packed A (m x k), packed B (k x n) and the C
/// window in place.
fn gemm_pure<T: NumElement>(
    a: &[T],
    b: &[T],
    c: &mut [T],
    offset_c: usize,
    ldc: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    beta: T,
) {
    let row_kernel = |i: usize, row: &mut [T]| {
        for j in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                acc = acc.add(a[i * k + p].mul(b[p * n + j]));
            }
            row[j] = alpha.mul(acc).add(beta.mul(row[j]));
        }
    };

    #[cfg(feature = "parallel")]
    if m >= PAR_GEMM_MIN_ROWS {
        c[offset_c..]
            .par_chunks_mut(ldc.max(1))
            .take(m)
            .enumerate()
            .for_each(|(i, row)| row_kernel(i, row));
        return;
    }

    for i in 0..m {
        let start = offset_c + i * ldc;
        row_kernel(i, &mut c[start..start + n]);
    }
}

/// Native gemm via faer on packed operands, following the same pre-scale /
/// accumulate handling as the strided batched kernel.
#[cfg(feature = "faer")]
fn gemm_faer<T>(
    a: &[T],
    b: &[T],
    c: &mut [T],
    offset_c: usize,
    ldc: usize,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    beta: T,
) where
    T: faer_traits::ComplexField
        + Copy
        + Send
        + Sync
        + std::ops::Mul<Output = T>
        + std::ops::Add<Output = T>
        + num_traits::Zero
        + num_traits::One
        + PartialEq,
{
    use faer::linalg::matmul::matmul_with_conj;
    use faer::mat::{MatMut, MatRef};
    use faer::{Accum, Conj, Par};

    let is_beta_zero = beta == T::zero();
    let is_beta_one = beta == T::one();
    if !is_beta_zero && !is_beta_one {
        for i in 0..m {
            for j in 0..n {
                let idx = offset_c + i * ldc + j;
                c[idx] = beta * c[idx];
            }
        }
    }
    let accum = if is_beta_zero { Accum::Replace } else { Accum::Add };

    unsafe {
        let a_mat: MatRef<'_, T> = MatRef::from_raw_parts(a.as_ptr(), m, k, k as isize, 1);
        let b_mat: MatRef<'_, T> = MatRef::from_raw_parts(b.as_ptr(), k, n, n as isize, 1);
        let c_mat: MatMut<'_, T> = MatMut::from_raw_parts_mut(
            c.as_mut_ptr().add(offset_c),
            m,
            n,
            ldc as isize,
            1,
        );
        matmul_with_conj(c_mat, accum, a_mat, Conj::No, b_mat, Conj::No, alpha, Par::Seq);
    }
}

impl HostMath {
    /// `C = alpha * op(A) * op(B) + beta * C` over row-major buffer windows.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        a: &Buffer,
        offset_a: usize,
        lda: usize,
        b: &Buffer,
        offset_b: usize,
        ldb: usize,
        beta: f64,
        c: &Buffer,
        offset_c: usize,
        ldc: usize,
    ) -> Result<()> {
        let dtype = check_same_dtype(a, b, c)?;
        let (ar, ac) = if trans_a { (k, m) } else { (m, k) };
        let (br, bc) = if trans_b { (n, k) } else { (k, n) };
        check_window(a, offset_a, ar, ac, lda, 'A')?;
        check_window(b, offset_b, br, bc, ldb, 'B')?;
        check_window(c, offset_c, m, n, ldc, 'C')?;

        // Native path covers the real float dtypes; everything else runs the
        // pure kernel under either mode, identically.
        #[cfg(feature = "faer")]
        if self.use_native() && dtype == DType::Float32 {
            let pa: Vec<f32> = pack(a, offset_a, lda, m, k, trans_a)?;
            let pb: Vec<f32> = pack(b, offset_b, ldb, k, n, trans_b)?;
            let mut cells = c.write();
            let cw = f32::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
                op: "gemm",
                dtype,
            })?;
            gemm_faer(&pa, &pb, cw, offset_c, ldc, m, n, k, alpha as f32, beta as f32);
            return Ok(());
        }
        #[cfg(feature = "faer")]
        if self.use_native() && dtype == DType::Float64 {
            let pa: Vec<f64> = pack(a, offset_a, lda, m, k, trans_a)?;
            let pb: Vec<f64> = pack(b, offset_b, ldb, k, n, trans_b)?;
            let mut cells = c.write();
            let cw = f64::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
                op: "gemm",
                dtype,
            })?;
            gemm_faer(&pa, &pb, cw, offset_c, ldc, m, n, k, alpha, beta);
            return Ok(());
        }

        numeric_dispatch!(dtype, "gemm", T => {
            let pa: Vec<T> = pack(a, offset_a, lda, m, k, trans_a)?;
            let pb: Vec<T> = pack(b, offset_b, ldb, k, n, trans_b)?;
            let mut cells = c.write();
            let cw = T::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
                op: "gemm",
                dtype,
            })?;
            gemm_pure(
                &pa,
                &pb,
                cw,
                offset_c,
                ldc,
                m,
                n,
                k,
                T::from_f64(alpha),
                T::from_f64(beta),
            );
            Ok(())
        })
    }

    /// `y = alpha * op(A) * x + beta * y` over buffer windows.
    #[allow(clippy::too_many_arguments)]
    pub fn gemv(
        &self,
        trans: bool,
        m: usize,
        n: usize,
        alpha: f64,
        a: &Buffer,
        offset_a: usize,
        lda: usize,
        x: &Buffer,
        offset_x: usize,
        beta: f64,
        y: &Buffer,
        offset_y: usize,
    ) -> Result<()> {
        let dtype = check_same_dtype(a, x, y)?;
        check_window(a, offset_a, m, n, lda, 'A')?;
        let (rows, cols) = if trans { (n, m) } else { (m, n) };
        check_window(x, offset_x, 1, cols, cols.max(1), 'X')?;
        check_window(y, offset_y, 1, rows, rows.max(1), 'Y')?;

        numeric_dispatch!(dtype, "gemv", T => {
            // op(A) packed as rows x cols.
            let pa: Vec<T> = pack(a, offset_a, lda, rows, cols, trans)?;
            let px: Vec<T> = pack(x, offset_x, cols.max(1), 1, cols, false)?;
            let mut cells = y.write();
            let yw = T::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
                op: "gemv",
                dtype,
            })?;
            let alpha = T::from_f64(alpha);
            let beta = T::from_f64(beta);
            for i in 0..rows {
                let mut acc = T::zero();
                for j in 0..cols {
                    acc = acc.add(pa[i * cols + j].mul(px[j]));
                }
                let slot = offset_y + i;
                yw[slot] = alpha.mul(acc).add(beta.mul(yw[slot]));
            }
            Ok(())
        })
    }

    /// `C = alpha * op(A) * op(A)^T + beta * C`, writing only the `uplo`
    /// triangle of the `n x n` output.
    #[allow(clippy::too_many_arguments)]
    pub fn syrk(
        &self,
        uplo: Uplo,
        trans: bool,
        n: usize,
        k: usize,
        alpha: f64,
        a: &Buffer,
        offset_a: usize,
        lda: usize,
        beta: f64,
        c: &Buffer,
        offset_c: usize,
        ldc: usize,
    ) -> Result<()> {
        if n == 0 || k == 0 {
            return Err(Error::InvalidArgument(
                "n and k must be greater than 0 for syrk".into(),
            ));
        }
        let dtype = check_same_dtype(a, a, c)?;
        let (ar, ac) = if trans { (k, n) } else { (n, k) };
        check_window(a, offset_a, ar, ac, lda, 'A')?;
        check_window(c, offset_c, n, n, ldc, 'C')?;

        numeric_dispatch!(dtype, "syrk", T => {
            // op(A) packed as n x k; the product is symmetric.
            let pa: Vec<T> = pack(a, offset_a, lda, n, k, trans)?;
            let mut cells = c.write();
            let cw = T::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
                op: "syrk",
                dtype,
            })?;
            let alpha = T::from_f64(alpha);
            let beta = T::from_f64(beta);
            for i in 0..n {
                for j in 0..n {
                    let write = match uplo {
                        Uplo::Upper => j >= i,
                        Uplo::Lower => j <= i,
                    };
                    if !write {
                        continue;
                    }
                    let mut acc = T::zero();
                    for p in 0..k {
                        acc = acc.add(pa[i * k + p].mul(pa[j * k + p]));
                    }
                    let slot = offset_c + i * ldc + j;
                    cw[slot] = alpha.mul(acc).add(beta.mul(cw[slot]));
                }
            }
            Ok(())
        })
    }

    /// 2-D matrix product `A (m x k) * B (k x n)`, allocating the output.
    pub fn matmul(&self, a: &NDArray, b: &NDArray) -> Result<NDArray> {
        if a.ndim() != 2 || b.ndim() != 2 {
            return Err(Error::InvalidArgument(format!(
                "matmul expects rank-2 operands, got {:?} and {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let (m, k) = (a.shape()[0], a.shape()[1]);
        let (kb, n) = (b.shape()[0], b.shape()[1]);
        if k != kb {
            return Err(Error::ShapeMismatch(a.shape().to_vec(), b.shape().to_vec()));
        }
        let dtype = crate::dtype::promote(a.dtype(), b.dtype());
        let a = self.cast_if_needed(a, dtype)?;
        let b = self.cast_if_needed(b, dtype)?;
        let out = NDArray::alloc(&[m, n], dtype);
        self.gemm(
            false,
            false,
            m,
            n,
            k,
            1.0,
            a.buffer(),
            a.offset(),
            k.max(1),
            b.buffer(),
            b.offset(),
            n.max(1),
            0.0,
            out.buffer(),
            out.offset(),
            n.max(1),
        )?;
        Ok(out)
    }

    fn cast_if_needed(&self, x: &NDArray, dtype: DType) -> Result<NDArray> {
        if x.dtype() == dtype {
            Ok(x.clone())
        } else {
            self.astype(x, dtype)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use approx::assert_relative_eq;

    fn la() -> HostMath {
        HostMath::new()
    }

    fn matrix(data: Vec<f32>, rows: usize, cols: usize) -> NDArray {
        NDArray::from_vec(data, &[rows, cols]).unwrap()
    }

    #[test]
    fn test_gemm_identity() {
        let a = matrix(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], 3, 3);
        let eye = matrix(
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            3,
            3,
        );
        let c = la().matmul(&a, &eye).unwrap();
        assert_eq!(c.to_nested(), a.to_nested());
    }

    #[test]
    fn test_gemm_transpose_and_scaling() {
        // C = 2 * A^T * B + 3 * C
        let a = matrix(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = matrix(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let c = matrix(vec![1.0, 1.0, 1.0, 1.0], 2, 2);
        la()
            .gemm(
                true,
                false,
                2,
                2,
                2,
                2.0,
                a.buffer(),
                0,
                2,
                b.buffer(),
                0,
                2,
                3.0,
                c.buffer(),
                0,
                2,
            )
            .unwrap();
        // A^T = [[1,3],[2,4]]; A^T*B = [[26,30],[38,44]]
        assert_eq!(
            c.as_vec::<f32>().unwrap(),
            vec![55.0, 63.0, 79.0, 91.0]
        );
    }

    #[test]
    fn test_gemm_pure_native_agree() {
        if !crate::backend::capabilities().native_blas {
            return;
        }
        let pure = HostMath::force_pure();
        let native = HostMath::force_native().unwrap();
        let a = matrix((0..20).map(|v| v as f32 * 0.5).collect(), 4, 5);
        let b = matrix((0..15).map(|v| v as f32 - 7.0).collect(), 5, 3);
        let cp = pure.matmul(&a, &b).unwrap();
        let cn = native.matmul(&a, &b).unwrap();
        let vp = cp.as_vec::<f32>().unwrap();
        let vn = cn.as_vec::<f32>().unwrap();
        for (x, y) in vp.iter().zip(&vn) {
            assert_relative_eq!(x, y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_gemm_window_validation() {
        let a = matrix(vec![0.0; 9], 3, 3);
        let b = matrix(vec![0.0; 9], 3, 3);
        let c = matrix(vec![0.0; 9], 3, 3);
        // Claiming m=4 rows overruns buffer A.
        let err = la()
            .gemm(
                false, false, 4, 3, 3, 1.0,
                a.buffer(), 0, 3,
                b.buffer(), 0, 3,
                0.0,
                c.buffer(), 0, 3,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MatrixOverBuffer { which: 'A' }));
        // Oversized offset overruns buffer C.
        let err = la()
            .gemm(
                false, false, 3, 3, 3, 1.0,
                a.buffer(), 0, 3,
                b.buffer(), 0, 3,
                0.0,
                c.buffer(), 2, 3,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MatrixOverBuffer { which: 'C' }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_gemv() {
        let a = matrix(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let x = NDArray::from_vec(vec![1.0f32, 0.0, -1.0], &[3]).unwrap();
        let y = NDArray::from_vec(vec![10.0f32, 20.0], &[2]).unwrap();
        la()
            .gemv(
                false, 2, 3, 1.0,
                a.buffer(), 0, 3,
                x.buffer(), 0,
                1.0,
                y.buffer(), 0,
            )
            .unwrap();
        // A*x = [-2, -2]
        assert_eq!(y.as_vec::<f32>().unwrap(), vec![8.0, 18.0]);
    }

    #[test]
    fn test_gemv_transposed() {
        let a = matrix(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let x = NDArray::from_vec(vec![1.0f32, 1.0], &[2]).unwrap();
        let y = NDArray::from_vec(vec![0.0f32; 3], &[3]).unwrap();
        la()
            .gemv(
                true, 2, 3, 1.0,
                a.buffer(), 0, 3,
                x.buffer(), 0,
                0.0,
                y.buffer(), 0,
            )
            .unwrap();
        assert_eq!(y.as_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_syrk_upper() {
        let a = matrix(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let c = matrix(vec![0.0; 4], 2, 2);
        la()
            .syrk(
                Uplo::Upper, false, 2, 2, 1.0,
                a.buffer(), 0, 2,
                0.0,
                c.buffer(), 0, 2,
            )
            .unwrap();
        // A*A^T = [[5,11],[11,25]]; lower triangle untouched.
        assert_eq!(c.as_vec::<f32>().unwrap(), vec![5.0, 11.0, 0.0, 25.0]);
    }

    #[test]
    fn test_syrk_rejects_zero_dims() {
        let a = matrix(vec![0.0; 4], 2, 2);
        let c = matrix(vec![0.0; 4], 2, 2);
        let err = la()
            .syrk(
                Uplo::Lower, false, 0, 2, 1.0,
                a.buffer(), 0, 2,
                0.0,
                c.buffer(), 0, 2,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_gemm_on_offset_windows() {
        // A 2x2 window living at offset 2 of a larger buffer.
        let backing = NDArray::from_vec(vec![9.0f32, 9.0, 1.0, 2.0, 3.0, 4.0], &[6]).unwrap();
        let b = matrix(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let c = matrix(vec![0.0; 4], 2, 2);
        la()
            .gemm(
                false, false, 2, 2, 2, 1.0,
                backing.buffer(), 2, 2,
                b.buffer(), 0, 2,
                0.0,
                c.buffer(), 0, 2,
            )
            .unwrap();
        assert_eq!(c.as_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
