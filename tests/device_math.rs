//! Device backend contract: mode-equivalent kernels, event ordering, and
//! cross-backend serialization.

use ndstride::{
    accelerated, DeviceMath, DeviceOutput, DeviceType, EventList, HostMath, NDArray,
    Scalar,
};

fn device() -> DeviceMath {
    accelerated("clblast", DeviceType::Default).unwrap()
}

fn upload(dm: &DeviceMath, host: &NDArray) -> (ndstride::DeviceArray, ndstride::Event) {
    dm.to_device(host, &EventList::new()).unwrap()
}

fn download(
    dm: &DeviceMath,
    dev: &ndstride::DeviceArray,
    after: ndstride::Event,
) -> NDArray {
    let (host, ev) = dm.read(dev, &EventList::from(after)).unwrap();
    ev.wait().unwrap();
    host
}

#[test]
fn test_sum_modes_agree_at_all_boundary_sizes() {
    let dm = device();
    for &n in &[1usize, 2, 3, 4, 255, 256, 257, 65535, 65536, 65537] {
        // Integer-valued floats keep every accumulation order bit-identical.
        let data: Vec<f32> = (0..n).map(|v| ((v % 31) as f32) - 15.0).collect();
        let host = NDArray::from_vec(data, &[n]).unwrap();
        let (dev, up) = upload(&dm, &host);
        let mut results = Vec::new();
        for mode in 0..3 {
            let (out, ev) = dm.sum(mode, &dev, &EventList::from(up.clone())).unwrap();
            let DeviceOutput::Array(arr) = out else {
                panic!("expected a device array");
            };
            results.push(download(&dm, &arr, ev).as_vec::<f32>().unwrap());
        }
        assert_eq!(results[0], results[1], "sum mode 1 diverges at n={n}");
        assert_eq!(results[0], results[2], "sum mode 2 diverges at n={n}");
        // And the device agrees with the host backend.
        let host_sum = HostMath::new().sum(&host, None).unwrap();
        assert_eq!(results[0][0], match host_sum.get_flat(0).unwrap() {
            Scalar::F32(v) => v,
            other => panic!("unexpected scalar {other:?}"),
        });
    }
}

#[test]
fn test_reduce_kernels_mode_equivalent_over_mnk() {
    let dm = device();
    // (m, n, k) with a reduced axis straddling the work-group width.
    for &(m, n, k) in &[(2usize, 255usize, 2usize), (2, 256, 2), (2, 257, 2), (3, 4, 5)] {
        let data: Vec<f32> = (0..m * n * k).map(|v| ((v % 13) as f32) - 6.0).collect();
        let host = NDArray::from_vec(data, &[m, n, k]).unwrap();
        let (dev, up) = upload(&dm, &host);
        let mut sums = Vec::new();
        let mut args = Vec::new();
        for mode in 0..3 {
            let (s, ev) = dm
                .reduce_sum(mode, &dev, m, n, k, &EventList::from(up.clone()))
                .unwrap();
            sums.push(download(&dm, &s, ev).as_vec::<f32>().unwrap());
            let (a, ev) = dm
                .reduce_argmax(mode, &dev, m, n, k, &EventList::from(up.clone()))
                .unwrap();
            args.push(download(&dm, &a, ev).as_vec::<i32>().unwrap());
        }
        assert_eq!(sums[0], sums[1]);
        assert_eq!(sums[0], sums[2]);
        assert_eq!(args[0], args[1]);
        assert_eq!(args[0], args[2]);
    }
}

#[test]
fn test_device_reduce_matches_host_axis_sum() {
    let dm = device();
    let host_math = HostMath::new();
    let host = NDArray::from_vec((0..24).map(|v| v as f32).collect(), &[2, 3, 4]).unwrap();
    let (dev, up) = upload(&dm, &host);
    // Reduce axis 1: (m, n, k) = (2, 3, 4).
    let (out, ev) = dm
        .reduce_sum(0, &dev, 2, 3, 4, &EventList::from(up))
        .unwrap();
    let device_result = download(&dm, &out, ev);
    let host_result = host_math.sum(&host, Some(1)).unwrap();
    assert_eq!(
        device_result.as_vec::<f32>().unwrap(),
        host_result.as_vec::<f32>().unwrap()
    );
}

#[test]
fn test_softmax_mode_equivalent_and_normalized() {
    let dm = device();
    let rows = 3usize;
    let cols = 257usize;
    let data: Vec<f32> = (0..rows * cols).map(|v| ((v % 17) as f32) * 0.25).collect();
    let host = NDArray::from_vec(data, &[rows, cols]).unwrap();
    let (dev, up) = upload(&dm, &host);
    let mut outs = Vec::new();
    for mode in 0..3 {
        let (sm, ev) = dm.softmax(mode, &dev, &EventList::from(up.clone())).unwrap();
        outs.push(download(&dm, &sm, ev).as_vec::<f32>().unwrap());
    }
    for v in &outs {
        for r in 0..rows {
            let total: f32 = v[r * cols..(r + 1) * cols].iter().sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }
    for (a, b) in outs[0].iter().zip(&outs[1]) {
        assert!((a - b).abs() < 1e-6);
    }
    for (a, b) in outs[0].iter().zip(&outs[2]) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_scatter_add_modes_match_host() {
    let dm = device();
    let host_math = HostMath::new();
    let indices = NDArray::from_vec(vec![0i32, 2, 0, 3, 2], &[5]).unwrap();
    let updates = NDArray::from_vec(
        (0..10).map(|v| v as f32).collect(),
        &[5, 2],
    )
    .unwrap();
    let expected = NDArray::zeros(&[4, 2], ndstride::DType::Float32);
    host_math
        .scatter_add(&indices, &updates, &expected)
        .unwrap();

    for mode in 0..5 {
        let accum = NDArray::zeros(&[4, 2], ndstride::DType::Float32);
        let (d_idx, e1) = upload(&dm, &indices);
        let (d_upd, e2) = upload(&dm, &updates);
        let (d_acc, e3) = upload(&dm, &accum);
        let mut wait = EventList::new();
        wait.push(e1);
        wait.push(e2);
        wait.push(e3);
        let ev = dm
            .scatter_add(mode, &d_idx, &d_upd, &d_acc, &wait)
            .unwrap();
        let got = download(&dm, &d_acc, ev);
        assert_eq!(
            got.as_vec::<f32>().unwrap(),
            expected.as_vec::<f32>().unwrap(),
            "scatter_add mode {mode} diverges from host"
        );
    }
}

#[test]
fn test_wait_list_chains_dependent_kernels() {
    let dm = device();
    let host = NDArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[4]).unwrap();
    // upload -> sum -> read, each ordered only by its wait-list.
    let (dev, up) = upload(&dm, &host);
    let (out, sum_ev) = dm.sum(2, &dev, &EventList::from(up)).unwrap();
    let DeviceOutput::Array(arr) = out else {
        panic!("expected a device array");
    };
    let (host_out, read_ev) = dm.read(&arr, &EventList::from(sum_ev)).unwrap();
    read_ev.wait().unwrap();
    assert_eq!(host_out.as_vec::<f32>().unwrap(), vec![10.0]);
}

#[test]
fn test_finish_drains_outstanding_work() {
    let dm = device();
    let host = NDArray::from_vec((0..1024).map(|v| v as f32).collect(), &[1024]).unwrap();
    let mut events = Vec::new();
    let (dev, up) = upload(&dm, &host);
    for mode in 0..3 {
        let (_out, ev) = dm.sum(mode, &dev, &EventList::from(up.clone())).unwrap();
        events.push(ev);
    }
    dm.finish().unwrap();
    assert!(events.iter().all(|e| e.is_finished()));
}

#[test]
fn test_portable_serialization_crosses_backends() {
    // Serialize on the host, reconstruct, push through the device, and
    // compare against the pure-host result.
    let pure = HostMath::force_pure();
    let dm = device();
    let original =
        NDArray::from_vec(vec![1.0f32, 2.0, -3.0, -4.0, 5.0, -6.0], &[6]).unwrap();
    let restored = NDArray::deserialize(&original.serialize()).unwrap();
    assert_eq!(restored.to_nested(), original.to_nested());

    let host_sum = pure.sum(&restored, None).unwrap();
    let (dev, up) = upload(&dm, &restored);
    let (out, ev) = dm.sum(0, &dev, &EventList::from(up)).unwrap();
    let DeviceOutput::Array(arr) = out else {
        panic!("expected a device array");
    };
    let device_sum = download(&dm, &arr, ev);
    assert_eq!(
        device_sum.get_flat(0).unwrap(),
        host_sum.get_flat(0).unwrap()
    );
}
