//! Benchmarks for the pairing hot path
//!
//! Measures one full request lifecycle per iteration:
//! - Deferred pairing (submit, read, reply)
//! - Immediate pairing (read, submit, reply)
//! - Encoding bulk OUT frames of increasing size

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{Urb, UrbReply};
use vhci::{
    DeviceRequest, ReadBuffer, ReadRequest, ReadStatus, RequestPool, Submitted, UrbEncoder,
    UsbIpEncoder, VirtualController,
};

const DEVID: u32 = 0x0001_0002;

fn benchmark_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");
    let vc = VirtualController::with_usbip(DEVID, RequestPool::new(64));
    let urb = Urb::bulk_in(DEVID, 1, 64);

    group.bench_function("deferred", |b| {
        b.iter(|| {
            let (request, _reply) = DeviceRequest::new(black_box(urb.clone()));
            vc.submit(request).unwrap();
            let (reader, _frame) = ReadRequest::new(4096);
            let ReadStatus::Completed { seqnum, .. } = vc.read(reader).unwrap() else {
                unreachable!("a request was queued");
            };
            vc.complete_response(UrbReply::success(seqnum, Bytes::new()))
                .unwrap();
        })
    });

    group.bench_function("immediate", |b| {
        b.iter(|| {
            let (reader, _frame) = ReadRequest::new(4096);
            vc.read(reader).unwrap();
            let (request, _reply) = DeviceRequest::new(black_box(urb.clone()));
            let Submitted::Dispatched { seqnum } = vc.submit(request).unwrap() else {
                unreachable!("a reader was waiting");
            };
            vc.complete_response(UrbReply::success(seqnum, Bytes::new()))
                .unwrap();
        })
    });

    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_bulk_out");

    for size in [64usize, 512, 4096, 16384] {
        let urb = Urb::bulk_out(DEVID, 2, Bytes::from(vec![0xab; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &urb, |b, urb| {
            b.iter(|| {
                let mut buf = ReadBuffer::new(32 * 1024);
                UsbIpEncoder.encode(&mut buf, 1, black_box(urb)).unwrap();
                buf.freeze()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_lifecycle, benchmark_encode);
criterion_main!(benches);
