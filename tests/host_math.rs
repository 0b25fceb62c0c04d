//! Host backend behavior: broadcasting algebra, reductions, indexed
//! scatter/gather and the convolution windowing kernels.

use ndstride::{AssignOp, DType, ElemOp, HostMath, NDArray, Scalar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn la() -> HostMath {
    HostMath::new()
}

#[test]
fn test_addition_commutes_under_broadcasting() {
    let a = NDArray::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
    let b = NDArray::from_vec(vec![10.0f32, 20.0, 30.0], &[3]).unwrap();
    let ab = la().op(&a, ElemOp::Add, &b).unwrap();
    let ba = la().op(&b, ElemOp::Add, &a).unwrap();
    assert_eq!(ab.to_nested(), ba.to_nested());
    assert_eq!(ab.shape(), &[2, 3]);
}

#[test]
fn test_subtraction_antisymmetry() {
    let a = NDArray::from_vec(vec![5.0f32, -1.0, 2.5, 8.0], &[4]).unwrap();
    let b = NDArray::from_vec(vec![1.0f32, 4.0, -2.5, 0.0], &[4]).unwrap();
    let ab = la().op(&a, ElemOp::Sub, &b).unwrap();
    let neg_ba = la().neg(&la().op(&b, ElemOp::Sub, &a).unwrap()).unwrap();
    assert_eq!(ab.to_nested(), neg_ba.to_nested());
}

#[test]
fn test_batch_broadcast_repeats_trailing_shape() {
    // A [2, 2, 2] batch against a trailing [2, 2] operand.
    let a = NDArray::from_vec((0..8).map(|v| v as f32).collect(), &[2, 2, 2]).unwrap();
    let b = NDArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    let out = la().op(&a, ElemOp::Add, &b).unwrap();
    assert_eq!(
        out.as_vec::<f32>().unwrap(),
        vec![1.0, 3.0, 5.0, 7.0, 5.0, 7.0, 9.0, 11.0]
    );
}

#[test]
fn test_sum_worked_example() {
    let x = NDArray::from_vec(vec![1.0f32, 2.0, -3.0, -4.0, 5.0, -6.0], &[6]).unwrap();
    let total = la().sum(&x, None).unwrap();
    assert_eq!(total.get_flat(0).unwrap(), Scalar::F32(-5.0));
}

#[test]
fn test_reduce_sum_axis_examples() {
    let x = NDArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    let cols = la().sum(&x, Some(0)).unwrap();
    assert_eq!(cols.as_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    let rows = la().sum(&x, Some(1)).unwrap();
    assert_eq!(rows.as_vec::<f32>().unwrap(), vec![6.0, 15.0]);
}

#[test]
fn test_axis_sum_refolds_to_full_reduction() {
    let x = NDArray::from_vec((0..24).map(|v| (v as f32) - 11.0).collect(), &[2, 3, 4])
        .unwrap();
    let full = la().sum(&x, None).unwrap().get_flat(0).unwrap().to_f64();
    for axis in 0..3 {
        let mut partial = la().sum(&x, Some(axis)).unwrap();
        while partial.ndim() > 0 {
            partial = la().sum(&partial, Some(0)).unwrap();
        }
        assert_eq!(partial.get_flat(0).unwrap().to_f64(), full, "axis {axis}");
    }
}

#[test]
fn test_amax_differs_from_max_on_sign_ties() {
    let x = NDArray::from_vec(vec![-3.0f32, 3.0], &[2]).unwrap();
    assert_eq!(la().max(&x, None).unwrap().get_flat(0).unwrap(), Scalar::F32(3.0));
    assert_eq!(
        la().amax(&x, None).unwrap().get_flat(0).unwrap(),
        Scalar::F32(-3.0)
    );
}

#[test]
fn test_pure_and_native_sum_agree_at_boundary_sizes() {
    let pure = HostMath::force_pure();
    let auto = HostMath::new();
    for &n in &[1usize, 2, 3, 4, 255, 256, 257, 65535, 65536, 65537] {
        let data: Vec<f32> = (0..n).map(|v| ((v % 251) as f32) - 125.0).collect();
        let x = NDArray::from_vec(data, &[n]).unwrap();
        let a = pure.sum(&x, None).unwrap().get_flat(0).unwrap();
        let b = auto.sum(&x, None).unwrap().get_flat(0).unwrap();
        assert_eq!(a, b, "sum diverges at n={n}");
    }
}

#[test]
fn test_gemm_identity_worked_example() {
    let a = NDArray::from_vec(
        vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        &[3, 3],
    )
    .unwrap();
    let mut eye_data = vec![0.0f32; 9];
    for i in 0..3 {
        eye_data[i * 3 + i] = 1.0;
    }
    let eye = NDArray::from_vec(eye_data, &[3, 3]).unwrap();
    let c = la().matmul(&a, &eye).unwrap();
    assert_eq!(c.to_nested(), a.to_nested());
}

#[test]
fn test_gemm_pure_native_agree_at_boundary_sizes() {
    if !ndstride::backend::capabilities().native_blas {
        return;
    }
    let pure = HostMath::force_pure();
    let native = HostMath::force_native().unwrap();
    for &k in &[1usize, 3, 255, 256, 257] {
        // Integer-valued data keeps both paths bit-identical.
        let a_data: Vec<f32> = (0..2 * k).map(|v| ((v % 7) as f32) - 3.0).collect();
        let b_data: Vec<f32> = (0..k * 2).map(|v| ((v % 5) as f32) - 2.0).collect();
        let a = NDArray::from_vec(a_data, &[2, k]).unwrap();
        let b = NDArray::from_vec(b_data, &[k, 2]).unwrap();
        let cp = pure.matmul(&a, &b).unwrap();
        let cn = native.matmul(&a, &b).unwrap();
        assert_eq!(
            cp.as_vec::<f32>().unwrap(),
            cn.as_vec::<f32>().unwrap(),
            "gemm diverges at k={k}"
        );
    }
}

#[test]
fn test_gemm_pure_native_agree_on_random_shapes() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let pure = HostMath::force_pure();
    let auto = HostMath::new();
    for _ in 0..8 {
        let m = rng.gen_range(1usize..32);
        let k = rng.gen_range(1usize..32);
        let n = rng.gen_range(1usize..32);
        // Integer-valued data keeps both paths bit-identical.
        let a_data: Vec<f32> = (0..m * k).map(|_| rng.gen_range(-4i32..=4) as f32).collect();
        let b_data: Vec<f32> = (0..k * n).map(|_| rng.gen_range(-4i32..=4) as f32).collect();
        let a = NDArray::from_vec(a_data, &[m, k]).unwrap();
        let b = NDArray::from_vec(b_data, &[k, n]).unwrap();
        let cp = pure.matmul(&a, &b).unwrap();
        let cn = auto.matmul(&a, &b).unwrap();
        assert_eq!(
            cp.as_vec::<f32>().unwrap(),
            cn.as_vec::<f32>().unwrap(),
            "gemm diverges at m={m} k={k} n={n}"
        );
    }
}

#[test]
fn test_scatter_add_worked_example() {
    let indices = NDArray::from_vec(vec![0i32, 2], &[2]).unwrap();
    let updates =
        NDArray::from_vec(vec![1.0f32, 2.0, 3.0, 7.0, 8.0, 9.0], &[2, 3]).unwrap();
    let accum = NDArray::ones(&[4, 3], DType::Float32).unwrap();
    la().scatter_add(&indices, &updates, &accum).unwrap();
    assert_eq!(
        accum.as_vec::<f32>().unwrap(),
        vec![2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 8.0, 9.0, 10.0, 1.0, 1.0, 1.0]
    );
}

#[test]
fn test_scatter_add_order_independent_sums() {
    let fwd = NDArray::from_vec(vec![0i32, 1, 0, 1], &[4]).unwrap();
    let rev = NDArray::from_vec(vec![1i32, 0, 1, 0], &[4]).unwrap();
    let upd_fwd = NDArray::from_vec(vec![1i32, 2, 3, 4], &[4, 1]).unwrap();
    let upd_rev = NDArray::from_vec(vec![2i32, 1, 4, 3], &[4, 1]).unwrap();
    let a = NDArray::zeros(&[2, 1], DType::Int32);
    let b = NDArray::zeros(&[2, 1], DType::Int32);
    la().scatter_add(&fwd, &upd_fwd, &a).unwrap();
    la().scatter_add(&rev, &upd_rev, &b).unwrap();
    assert_eq!(a.as_vec::<i32>().unwrap(), b.as_vec::<i32>().unwrap());
}

#[test]
fn test_update_compound_ops() {
    let x = NDArray::from_vec(vec![2.0f32, 4.0, 8.0], &[3]).unwrap();
    let ix = NDArray::from_vec(vec![0i32, 1, 2], &[3]).unwrap();
    let v = NDArray::scalar(Scalar::F32(2.0));
    la().update(&x, AssignOp::Pow, &v, &[&ix]).unwrap();
    assert_eq!(x.as_vec::<f32>().unwrap(), vec![4.0, 16.0, 64.0]);
    la().update(&x, AssignOp::Div, &v, &[&ix]).unwrap();
    assert_eq!(x.as_vec::<f32>().unwrap(), vec![2.0, 8.0, 32.0]);
}

#[test]
fn test_im2col_col2im_overlap_sum() {
    let img = NDArray::from_vec((1..=16).map(|v| v as f32).collect(), &[1, 1, 4, 4])
        .unwrap();
    let cols = la().im2col(&img, (3, 3), (1, 1), false, (1, 1)).unwrap();
    let back = NDArray::zeros(&[1, 1, 4, 4], DType::Float32);
    la()
        .col2im(&cols, &back, (3, 3), (1, 1), false, (1, 1))
        .unwrap();
    // Corner pixels sit in exactly one 3x3 window; the center four in all
    // four windows.
    let v = back.as_vec::<f32>().unwrap();
    let orig = img.as_vec::<f32>().unwrap();
    assert_eq!(v[0], orig[0]);
    assert_eq!(v[5], orig[5] * 4.0);
}

#[test]
fn test_im2col_col2im_exact_when_windows_disjoint() {
    let img = NDArray::from_vec((0..36).map(|v| v as f32).collect(), &[1, 1, 6, 6])
        .unwrap();
    let cols = la().im2col(&img, (3, 3), (3, 3), false, (1, 1)).unwrap();
    let back = NDArray::zeros(&[1, 1, 6, 6], DType::Float32);
    la()
        .col2im(&cols, &back, (3, 3), (3, 3), false, (1, 1))
        .unwrap();
    assert_eq!(back.as_vec::<f32>().unwrap(), img.as_vec::<f32>().unwrap());
}

#[test]
fn test_promotion_mixed_dtypes() {
    let ints = NDArray::from_vec(vec![1i32, 2], &[2]).unwrap();
    let floats = NDArray::from_vec(vec![0.5f64, 0.25], &[2]).unwrap();
    let out = la().op(&ints, ElemOp::Add, &floats).unwrap();
    assert_eq!(out.dtype(), DType::Float64);
    assert_eq!(out.as_vec::<f64>().unwrap(), vec![1.5, 2.25]);
}
