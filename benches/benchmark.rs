use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use ndarray::Array3;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand_distr::Normal;
use samfp::synthetic::AiryCube;
use samfp::{
    Cube, FreeSpectralRange, PhaseMapApplier, PhaseMapExtractor, PhaseMapFitter, RefPixel,
    RingCenterLocator,
};

const FSR: FreeSpectralRange = FreeSpectralRange {
    value: 24.,
    channels: 24,
};

fn noisy_cube() -> Cube {
    let (data, header) = AiryCube::default().build().unwrap().into_parts();
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Array3::random_using(data.dim(), Normal::new(0., 0.01).unwrap(), &mut rng);
    Cube::new(data + noise, header).unwrap()
}

fn center_benchmark(c: &mut Criterion) {
    let mut center = c.benchmark_group("center");
    center.sample_size(10);

    let cube = noisy_cube();
    let locator = RingCenterLocator::default();
    center.bench_function("center blocking", |b| b.iter(|| locator.locate(&cube, 24)));
    center.bench_function("center parallel", |b| {
        b.iter(|| locator.locate_par(&cube, 24))
    });
}

fn extraction_benchmark(c: &mut Criterion) {
    let mut extraction = c.benchmark_group("extraction");
    extraction.sample_size(10);

    let cube = noisy_cube();
    let ref_pixel = RefPixel::new(55, 68);
    let extractor = PhaseMapExtractor::default().with_continuum_subtraction(true);
    extraction.bench_function("extraction blocking", |b| {
        b.iter(|| extractor.extract(&cube, ref_pixel, FSR))
    });
    extraction.bench_function("extraction parallel", |b| {
        b.iter(|| extractor.extract_par(&cube, ref_pixel, FSR))
    });
}

fn apply_benchmark(c: &mut Criterion) {
    let mut apply = c.benchmark_group("apply");
    apply.sample_size(10);

    let cube = noisy_cube();
    let observed = PhaseMapExtractor::default()
        .extract(&cube, RefPixel::new(55, 68), FSR)
        .unwrap()
        .phase_map;
    let fitted = PhaseMapFitter::default().fit(&observed).unwrap().fitted;
    let applier = PhaseMapApplier::default();
    apply.bench_function("apply blocking", |b| {
        b.iter_batched(
            || fitted.clone(),
            |map| applier.apply(&cube, &map),
            BatchSize::SmallInput,
        )
    });
    apply.bench_function("apply parallel", |b| {
        b.iter_batched(
            || fitted.clone(),
            |map| applier.apply_par(&cube, &map),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    center_benchmark,
    extraction_benchmark,
    apply_benchmark
);
criterion_main!(benches);
