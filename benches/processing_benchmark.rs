use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use telemetry_curator::processors::{ColumnDeriver, ParallelProcessor, Pseudonymizer, SchemaValidator};
use telemetry_curator::readers::RawEvents;

// Create newline-delimited sensor events for benchmarking
fn create_sensor_events(count: usize) -> Vec<u8> {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let mut content = Vec::new();

    for i in 0..count {
        let event = json!({
            "sensor_id": format!("sensor-{:04}", i % 500),
            "city": ["Paris", "Tokyo", "Lima", "Oslo"][i % 4],
            "timestamp": (base + Duration::seconds(i as i64 * 17)).to_rfc3339(),
            "temperature_c": 10.0 + (i % 200) as f64 * 0.1,
            "humidity_pct": (i % 100) as f64,
            "aqi": (i % 300) as f64,
            "battery_level": (i % 101) as f64,
        });
        content.extend(serde_json::to_vec(&event).unwrap());
        content.push(b'\n');
    }

    content
}

fn parse_events(content: &[u8]) -> Vec<Map<String, Value>> {
    RawEvents::new(content)
        .filter_map(|event| match event {
            telemetry_curator::readers::RawEvent::Record(fields) => Some(fields),
            _ => None,
        })
        .collect()
}

fn benchmark_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");
    let validator = SchemaValidator::new(
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        Duration::minutes(5),
    );

    for size in [1_000, 10_000].iter() {
        let events = parse_events(&create_sensor_events(*size));

        group.bench_with_input(BenchmarkId::new("validate_sensor", size), &events, |b, events| {
            b.iter(|| {
                events
                    .iter()
                    .filter(|fields| validator.validate_sensor(black_box(fields)).is_valid())
                    .count()
            })
        });
    }

    group.finish();
}

fn benchmark_curation(c: &mut Criterion) {
    let mut group = c.benchmark_group("curation");
    let validator = SchemaValidator::new(
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        Duration::minutes(5),
    );
    let pseudonymizer = Pseudonymizer::new();
    let deriver = ColumnDeriver::default();

    let records: Vec<_> = parse_events(&create_sensor_events(10_000))
        .iter()
        .filter_map(|fields| validator.validate_sensor(fields).into_valid())
        .collect();

    group.bench_function("pseudonymize_and_derive_sequential", |b| {
        b.iter(|| {
            records
                .iter()
                .cloned()
                .map(|record| {
                    let hash = pseudonymizer.pseudonymize(&record.sensor_id);
                    deriver.derive_sensor(record, hash)
                })
                .count()
        })
    });

    for workers in [1, 4].iter() {
        let processor = ParallelProcessor::new(*workers);
        group.bench_with_input(
            BenchmarkId::new("curate_sensor_parallel", workers),
            &records,
            |b, records| b.iter(|| processor.curate_sensor(black_box(records.clone())).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_event_parsing(c: &mut Criterion) {
    let content = create_sensor_events(10_000);

    c.bench_function("raw_event_scan", |b| {
        b.iter(|| RawEvents::new(black_box(&content)).count())
    });
}

criterion_group!(
    benches,
    benchmark_validation,
    benchmark_curation,
    benchmark_event_parsing
);
criterion_main!(benches);
