//! Benchmarks for the accounting hot paths
//!
//! - estimate_tokens over mixed English/Chinese text
//! - cached vs uncached calculate_tokens
//! - classify over typical prompts
//! - AnalyticsData::compute over 1000 activities

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use devcost_core::analytics::{default_window, AnalyticsData};
use devcost_core::classifier::ActivityClassifier;
use devcost_core::tokens::{estimate_tokens, CalculationMethod, TokenCalculator, TokenizerConfig};
use devcost_core::ErrorRegistry;
use devcost_types::{Activity, ActivityType, TokenUsage};
use std::sync::Arc;

const PROMPTS: [&str; 5] = [
    "Please implement a function that merges two sorted vectors",
    "The server crashes with a panic on startup, here is the stack trace",
    "Write the README section describing the config file",
    "We need a requirements document for the export feature",
    "你好，今天的进展怎么样？",
];

fn mixed_text(repeat: usize) -> String {
    "fn main() { println!(\"hello\"); } // 中文注释 mixed content\n".repeat(repeat)
}

fn generate_activities(count: usize) -> Vec<Activity> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let start = now - Duration::hours((i % 720) as i64);
            Activity::new(
                format!("activity-{i}"),
                ActivityType::ALL[i % ActivityType::ALL.len()],
                "",
                TokenUsage::new(500 + i as u64 * 7, 200 + i as u64 * 3),
            )
            .with_times(start, start + Duration::minutes((i % 45) as i64 + 1))
        })
        .collect()
}

fn estimation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens");
    for repeat in [1, 100, 10_000] {
        let text = mixed_text(repeat);
        group.bench_with_input(BenchmarkId::new("lines", repeat), &text, |b, text| {
            b.iter(|| black_box(estimate_tokens(text, 4.0, 1.5)));
        });
    }
    group.finish();
}

fn calculator_benchmark(c: &mut Criterion) {
    let registry = Arc::new(ErrorRegistry::builtin());
    let text = mixed_text(100);
    let mut group = c.benchmark_group("calculate_tokens");

    for cache_enabled in [false, true] {
        let config = TokenizerConfig {
            cache_enabled,
            ..TokenizerConfig::default()
        };
        let calculator = TokenCalculator::new(config, Arc::clone(&registry))
            .expect("default config is valid");
        let label = if cache_enabled { "cached" } else { "uncached" };

        group.bench_function(BenchmarkId::new("estimation", label), |b| {
            b.iter(|| black_box(calculator.calculate_tokens(&text, CalculationMethod::Estimation)));
        });
        if calculator.is_tiktoken_available() {
            group.bench_function(BenchmarkId::new("tiktoken", label), |b| {
                b.iter(|| black_box(calculator.calculate_tokens(&text, CalculationMethod::Tiktoken)));
            });
        }
    }
    group.finish();
}

fn classifier_benchmark(c: &mut Criterion) {
    let classifier = ActivityClassifier::default();
    c.bench_function("classify_batch/5_prompts", |b| {
        b.iter(|| black_box(classifier.classify_batch(&PROMPTS)));
    });
}

fn analytics_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("analytics_compute");
    for count in [10, 100, 1000] {
        let activities = generate_activities(count);
        group.bench_with_input(
            BenchmarkId::new("activities", count),
            &activities,
            |b, activities| {
                b.iter(|| black_box(AnalyticsData::compute(activities, default_window(), 10)));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    estimation_benchmark,
    calculator_benchmark,
    classifier_benchmark,
    analytics_benchmark
);
criterion_main!(benches);
