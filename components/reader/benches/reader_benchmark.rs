use std::collections::HashMap;
use std::fmt::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xtr_reader::{NodeKind, Reader, ReaderSettings};

fn count_names(input: &str, settings: ReaderSettings) -> (HashMap<String, usize>, HashMap<String, usize>) {
    let mut reader = Reader::from_str(input, settings);
    let mut elems = HashMap::new();
    let mut attrs = HashMap::new();

    while reader.read().unwrap() {
        if reader.node_kind() == NodeKind::Element {
            *elems.entry(reader.name().to_string()).or_insert(0) += 1;
            while reader.move_to_next_attribute() {
                *attrs.entry(reader.name().to_string()).or_insert(0) += 1;
            }
        }
    }

    (elems, attrs)
}

fn track_points(n: usize) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <gpx version=\"1.1\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n<trk><trkseg>\n",
    );
    for i in 0..n {
        let _ = write!(
            doc,
            "  <trkpt lat=\"51.{:06}\" lon=\"13.{:06}\"><ele>{}.5</ele>\
             <time>2021-06-01T10:{:02}:{:02}Z</time></trkpt>\n",
            i,
            i * 7,
            100 + i % 50,
            (i / 60) % 60,
            i % 60
        );
    }
    doc.push_str("</trkseg></trk>\n</gpx>\n");
    doc
}

fn entity_heavy(n: usize) -> String {
    let mut doc = String::from(
        "<!DOCTYPE doc [\n\
         <!ELEMENT doc (p*)>\n\
         <!ELEMENT p (#PCDATA)>\n\
         <!ATTLIST p class CDATA \"plain\">\n\
         <!ENTITY company \"Example &amp; Sons\">\n\
         ]>\n<doc>\n",
    );
    for i in 0..n {
        let _ = writeln!(doc, "<p>&company; paragraph {} &#x2014; &lt;escaped&gt;</p>", i);
    }
    doc.push_str("</doc>\n");
    doc
}

const MINIMAL: &str = "<e/>";

pub fn minimal_benchmark(c: &mut Criterion) {
    c.bench_function("minimal", |b| {
        b.iter(|| count_names(black_box(MINIMAL), ReaderSettings::default()))
    });
}

pub fn gpx_benchmark(c: &mut Criterion) {
    let doc = track_points(2000);
    let mut group = c.benchmark_group("gpx");
    for buffer_size in [64, 4096, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(buffer_size), &doc, |b, doc| {
            b.iter(|| {
                count_names(
                    black_box(doc),
                    ReaderSettings::default().with_buffer_size(buffer_size),
                )
            })
        });
    }
    group.finish();
}

pub fn dtd_benchmark(c: &mut Criterion) {
    let doc = entity_heavy(2000);
    c.bench_function("entities", |b| {
        b.iter(|| count_names(black_box(&doc), ReaderSettings::default()))
    });
    c.bench_function("entities no namespaces", |b| {
        b.iter(|| {
            count_names(
                black_box(&doc),
                ReaderSettings::default().with_namespaces(false),
            )
        })
    });
}

criterion_group!(benches, minimal_benchmark, gpx_benchmark, dtd_benchmark);
criterion_main!(benches);
