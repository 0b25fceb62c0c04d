//! View semantics and serialization of the array layer.

use ndstride::{DType, NDArray, Scalar, SerializeMode};

#[test]
fn test_reshape_shares_buffer_and_order() {
    let x = NDArray::from_vec((0..12).map(|v| v as f32).collect(), &[3, 4]).unwrap();
    let y = x.reshape(&[2, 6]).unwrap();
    assert!(y.shares_buffer(&x));
    assert_eq!(y.as_vec::<f32>().unwrap(), x.as_vec::<f32>().unwrap());
    // Writes through one view are visible through the other.
    y.set_flat(0, Scalar::F32(99.0)).unwrap();
    assert_eq!(x.get_flat(0).unwrap(), Scalar::F32(99.0));
}

#[test]
fn test_copy_breaks_buffer_identity() {
    let x = NDArray::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
    let c = x.copy();
    assert!(!c.shares_buffer(&x));
    assert_eq!(c.as_vec::<f32>().unwrap(), x.as_vec::<f32>().unwrap());
    c.set_flat(1, Scalar::F32(-1.0)).unwrap();
    assert_eq!(x.get_flat(1).unwrap(), Scalar::F32(2.0));
}

#[test]
fn test_index_and_range_are_views() {
    let x = NDArray::from_vec((0..12).map(|v| v as i32).collect(), &[4, 3]).unwrap();
    let row = x.index(2).unwrap();
    assert_eq!(row.shape(), &[3]);
    assert_eq!(row.as_vec::<i32>().unwrap(), vec![6, 7, 8]);
    assert!(row.shares_buffer(&x));

    let mid = x.range(1..3).unwrap();
    assert_eq!(mid.shape(), &[2, 3]);
    assert_eq!(mid.as_vec::<i32>().unwrap(), vec![3, 4, 5, 6, 7, 8]);
    mid.set_flat(0, Scalar::I32(42)).unwrap();
    assert_eq!(x.get_flat(3).unwrap(), Scalar::I32(42));
}

#[test]
fn test_portable_serialize_round_trip() {
    for dtype in [DType::Int16, DType::UInt64, DType::Float32, DType::Float64] {
        let x = NDArray::from_vec(vec![1.0f64, 2.0, 3.5, 0.0, 7.0, 8.0], &[2, 3]).unwrap();
        let x = cast(&x, dtype);
        let bytes = x.serialize();
        let back = NDArray::deserialize(&bytes).unwrap();
        assert_eq!(back.dtype(), x.dtype());
        assert_eq!(back.shape(), x.shape());
        assert_eq!(back.to_nested(), x.to_nested());
    }
}

#[test]
fn test_linear_serialize_round_trip() {
    let mut x = NDArray::from_vec(vec![5i32, -6, 7, -8], &[2, 2]).unwrap();
    x.set_serialize_mode(SerializeMode::Linear);
    let bytes = x.serialize();
    let back = NDArray::deserialize_linear(&bytes, DType::Int32).unwrap();
    assert_eq!(back.shape(), &[2, 2]);
    assert_eq!(back.as_vec::<i32>().unwrap(), vec![5, -6, 7, -8]);
}

#[test]
fn test_serialize_view_window_only() {
    // Serializing a narrowed view must carry only the window.
    let x = NDArray::from_vec((0..10).map(|v| v as f32).collect(), &[5, 2]).unwrap();
    let tail = x.range(3..5).unwrap();
    let back = NDArray::deserialize(&tail.serialize()).unwrap();
    assert_eq!(back.shape(), &[2, 2]);
    assert_eq!(back.as_vec::<f32>().unwrap(), vec![6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_deserialize_rejects_garbage() {
    assert!(NDArray::deserialize(&[1, 2, 3]).is_err());
    let x = NDArray::from_vec(vec![1.0f32], &[1]).unwrap();
    let mut bytes = x.serialize();
    bytes.truncate(bytes.len() - 1);
    assert!(NDArray::deserialize(&bytes).is_err());
}

fn cast(x: &NDArray, dtype: DType) -> NDArray {
    ndstride::HostMath::new().astype(x, dtype).unwrap()
}
