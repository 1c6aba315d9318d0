use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pyscout::environment::{
    identify_environment, Architecture, EnvCandidate, EnvKind, EnvSource, HostEnvironment,
    PythonEnvInfo, PythonVersion,
};
use pyscout::filesystem::LocalFileSystem;
use pyscout::locators::merge_env_infos;
use std::fs;
use tempfile::TempDir;

fn sample_env(i: usize, kind: EnvKind, source: EnvSource) -> PythonEnvInfo {
    PythonEnvInfo::new(format!("/home/u/.venvs/env{i}/bin/python"), kind)
        .with_name(format!("env{i}"))
        .with_location(format!("/home/u/.venvs/env{i}"))
        .with_version(PythonVersion::new(3, 11, (i % 10) as u32))
        .with_source(source)
}

fn benchmark_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_env_infos");
    for size in [10usize, 100, 1000] {
        let pairs: Vec<(PythonEnvInfo, PythonEnvInfo)> = (0..size)
            .map(|i| {
                let existing = sample_env(i, EnvKind::VirtualEnv, EnvSource::GlobalVirtualEnv);
                let incoming = sample_env(i, EnvKind::Venv, EnvSource::KnownPath)
                    .with_arch(Architecture::X64);
                (existing, incoming)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &pairs, |b, pairs| {
            b.iter(|| {
                for (existing, incoming) in pairs {
                    black_box(merge_env_infos(existing.clone(), incoming.clone()));
                }
            })
        });
    }
    group.finish();
}

fn benchmark_classification(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let temp = TempDir::new().unwrap();
    let host = HostEnvironment::default().with_home(temp.path());
    let fs_impl = LocalFileSystem;

    let layouts = [
        ("venv", "pyvenv.cfg"),
        ("conda", "conda-meta"),
        ("virtualenv", "bin/activate"),
        ("bare", ""),
    ];
    let mut candidates = Vec::new();
    for (name, marker) in layouts {
        let prefix = temp.path().join("envs").join(name);
        fs::create_dir_all(prefix.join("bin")).unwrap();
        fs::write(prefix.join("bin").join("python"), "").unwrap();
        match marker {
            "" => {}
            "conda-meta" => fs::create_dir_all(prefix.join(marker)).unwrap(),
            file => fs::write(prefix.join(file), "").unwrap(),
        }
        candidates.push((name, EnvCandidate::from_executable(prefix.join("bin").join("python"))));
    }

    let mut group = c.benchmark_group("identify_environment");
    for (name, candidate) in &candidates {
        group.bench_with_input(BenchmarkId::from_parameter(name), candidate, |b, candidate| {
            b.iter(|| {
                runtime.block_on(async {
                    black_box(identify_environment(&fs_impl, &host, black_box(candidate)).await)
                })
            })
        });
    }
    group.finish();

    c.bench_function("parse_python_version", |b| {
        b.iter(|| black_box(PythonVersion::parse(black_box("3.12.0rc2"))))
    });
}

criterion_group!(benches, benchmark_merge, benchmark_classification);
criterion_main!(benches);
