use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndstride::{accelerated, DeviceType, EventList, HostMath, NDArray};

fn bench_host_sum(c: &mut Criterion) {
    let la = HostMath::new();
    let mut group = c.benchmark_group("host_sum");
    for size in [256usize, 65_536, 1 << 20] {
        group.throughput(Throughput::Elements(size as u64));
        let data: Vec<f32> = (0..size).map(|v| ((v % 101) as f32) - 50.0).collect();
        let x = NDArray::from_vec(data, &[size]).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| la.sum(&x, None).unwrap());
        });
    }
    group.finish();
}

fn bench_host_gemm(c: &mut Criterion) {
    let pure = HostMath::force_pure();
    let mut group = c.benchmark_group("host_gemm");
    for size in [64usize, 128, 256] {
        group.throughput(Throughput::Elements((size * size * size) as u64));
        let a_data: Vec<f32> = (0..size * size).map(|v| ((v % 7) as f32) - 3.0).collect();
        let b_data: Vec<f32> = (0..size * size).map(|v| ((v % 5) as f32) - 2.0).collect();
        let a = NDArray::from_vec(a_data, &[size, size]).unwrap();
        let b = NDArray::from_vec(b_data, &[size, size]).unwrap();

        group.bench_with_input(BenchmarkId::new("pure", size), &size, |bch, _| {
            bch.iter(|| pure.matmul(&a, &b).unwrap());
        });
        if let Ok(native) = HostMath::force_native() {
            group.bench_with_input(BenchmarkId::new("native", size), &size, |bch, _| {
                bch.iter(|| native.matmul(&a, &b).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_device_sum_modes(c: &mut Criterion) {
    let dm = accelerated("clblast", DeviceType::Default).unwrap();
    let mut group = c.benchmark_group("device_sum_modes");
    let size = 1usize << 18;
    group.throughput(Throughput::Elements(size as u64));
    let data: Vec<f32> = (0..size).map(|v| ((v % 31) as f32) - 15.0).collect();
    let host = NDArray::from_vec(data, &[size]).unwrap();
    let (dev, up) = dm.to_device(&host, &EventList::new()).unwrap();
    up.wait().unwrap();
    for mode in 0..3 {
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, &mode| {
            b.iter(|| {
                let (_out, ev) = dm.sum(mode, &dev, &EventList::new()).unwrap();
                ev.wait().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_host_sum,
    bench_host_gemm,
    bench_device_sum_modes
);
criterion_main!(benches);
