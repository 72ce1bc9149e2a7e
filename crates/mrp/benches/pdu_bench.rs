use criterion::{Criterion, criterion_group, criterion_main};
use mrp::pdu::{self, Common, ManagerPair, OptionTlv, RingTest, SubTlv};
use mrp::{DomainId, MRP_TEST_DMAC, MacAddr, MrpFrame, Tlv};
use std::hint::black_box;

fn test_frame(with_option: bool) -> MrpFrame {
    let sa = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    let mut tlvs = vec![
        Tlv::RingTest(RingTest {
            prio: 0x8000,
            sa,
            port_role: 0,
            state: 1,
            transitions: 3,
            timestamp: 123_456,
        }),
        Tlv::Common(Common {
            seq_id: 42,
            domain: DomainId::default(),
        }),
    ];
    if with_option {
        tlvs.push(Tlv::Option(OptionTlv::iec(vec![SubTlv::TestMgrNack(
            ManagerPair {
                prio: 0x8000,
                sa,
                other_prio: 0xA000,
                other_sa: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
            },
        )])));
    }
    MrpFrame::new(MRP_TEST_DMAC, sa, tlvs)
}

fn encode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pdu_encode");

    let plain = test_frame(false);
    group.bench_function("ring_test", |b| b.iter(|| black_box(plain.encode())));

    let option = test_frame(true);
    group.bench_function("ring_test_nack", |b| b.iter(|| black_box(option.encode())));

    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pdu_decode");

    let plain = test_frame(false).encode();
    group.bench_function("ring_test", |b| {
        b.iter(|| black_box(pdu::decode(black_box(&plain))))
    });

    let option = test_frame(true).encode();
    group.bench_function("ring_test_nack", |b| {
        b.iter(|| black_box(pdu::decode(black_box(&option))))
    });

    group.finish();
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
