use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hil_monitor::transport::ScriptedTransport;
use hil_monitor::{LineEvent, LineReader, PatternTable};
use std::time::Duration;

const CONSOLE: &[&str] = &[
    "I (312) cpu_start: Starting scheduler on PRO CPU.",
    "Running getSetMnoProfile...",
    "C:/temp/file.c:890:getSetMnoProfile:PASS",
    "Running tcpEchoAsync...",
    "C:/temp/file.c:900:tcpEchoAsync:FAIL:Function sock.  Expression Evaluated To FALSE",
    "22 Tests 1 Failures 0 Ignored",
];

pub fn bench_classify(c: &mut Criterion) {
    let table = PatternTable::standard();
    c.bench_function("classify_console_lines", |b| {
        b.iter(|| {
            for line in CONSOLE {
                black_box(table.classify(black_box(line)));
            }
        })
    });
}

pub fn bench_line_reader(c: &mut Criterion) {
    let text: String = CONSOLE.iter().map(|l| format!("{l}\r\n")).collect::<String>().repeat(50);
    c.bench_function("read_lines", |b| {
        b.iter(|| {
            let mut transport = ScriptedTransport::new("BENCH");
            transport.push_text(&text);
            let mut reader = LineReader::new(Box::new(transport), Some(b'\r'));
            while let Ok(LineEvent::Line(line)) = reader.next_line() {
                black_box(line);
            }
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_classify, bench_line_reader
}
criterion_main!(benches);
