use core_text::Rope;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_insert(c: &mut Criterion) {
    c.bench_function("rope insert single char", |b| {
        let mut rope = Rope::new(&"line of text\n".repeat(2000));
        let mid = rope.length() / 2;
        b.iter(|| {
            rope.insert(mid, "x").unwrap();
            rope.delete(mid, mid + 1).unwrap();
            black_box(&rope);
        });
    });
}

fn bench_line_at_offset(c: &mut Criterion) {
    let rope = Rope::new(&"line of text\n".repeat(5000));
    let off = rope.length() - 10;
    c.bench_function("rope line_at_offset", |b| {
        b.iter(|| black_box(rope.line_at_offset(off).unwrap()));
    });
}

criterion_group!(benches, bench_insert, bench_line_at_offset);
criterion_main!(benches);
