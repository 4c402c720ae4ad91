use km003c_protocol::protocol::size;
use km003c_protocol::{decode_packet, AdcQueueSample, Attribute, DataPacketBuilder, MainHeader};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct SegmentFixture {
    attribute: Attribute,
    chunk: u8,
    payload: Vec<u8>,
}

fn fixed_segment() -> impl Strategy<Value = SegmentFixture> {
    let attribute = prop_oneof![
        Just((Attribute::Adc, size::ADC)),
        Just((Attribute::PdPacket, size::PD_STATUS)),
        Just((Attribute::LogMetadata, size::LOG_METADATA)),
    ];
    (attribute, 0u8..64)
        .prop_flat_map(|((attribute, len), chunk)| {
            proptest::collection::vec(any::<u8>(), len)
                .prop_map(move |payload| SegmentFixture {
                    attribute,
                    chunk,
                    payload,
                })
        })
}

fn opaque_segment() -> impl Strategy<Value = SegmentFixture> {
    let attribute = prop_oneof![
        Just(Attribute::Settings),
        (0x20u16..0x200).prop_map(Attribute::from),
        (0x201u16..0x8000).prop_map(Attribute::from),
    ];
    (attribute, 0u8..64, proptest::collection::vec(any::<u8>(), 0..96)).prop_map(
        |(attribute, chunk, payload)| SegmentFixture {
            attribute,
            chunk,
            payload,
        },
    )
}

fn chain() -> impl Strategy<Value = (Vec<SegmentFixture>, usize)> {
    (
        proptest::collection::vec(prop_oneof![fixed_segment(), opaque_segment()], 0..6),
        0usize..4,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x4B_4D_03),
        .. ProptestConfig::default()
    })]

    #[test]
    fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        match decode_packet(&data) {
            Ok(packet) => {
                prop_assert_eq!(packet.len, data.len());
                prop_assert!(packet.accounted_len() <= data.len());
                if packet.is_clean() {
                    prop_assert_eq!(packet.accounted_len(), data.len());
                }
            }
            Err(_) => prop_assert!(data.len() < size::HEADER),
        }
    }

    #[test]
    fn put_data_chains_are_fully_accounted(
        mut body in proptest::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut data = MainHeader::data(1, 0).to_bytes().to_vec();
        data.append(&mut body);
        let packet = decode_packet(&data).unwrap();
        prop_assert!(packet.segments().len() <= km003c_protocol::MAX_SEGMENTS);
        if packet.is_clean() {
            prop_assert_eq!(packet.accounted_len(), data.len());
            if let Some(last) = packet.segments().last() {
                prop_assert!(!last.has_next());
            }
        }
    }

    #[test]
    fn encode_decode_identity((fixtures, queue_samples) in chain(), id in any::<u8>()) {
        let mut builder = DataPacketBuilder::new(id);
        for fixture in &fixtures {
            builder = builder.segment(fixture.attribute, fixture.chunk, fixture.payload.clone());
        }
        let samples: Vec<AdcQueueSample> = (0..queue_samples)
            .map(|i| AdcQueueSample { sequence: i as u16, ..Default::default() })
            .collect();
        if queue_samples > 0 {
            builder = builder.queue_segment(0, &samples);
        }
        let data = builder.build().unwrap();

        let packet = decode_packet(&data).unwrap();
        prop_assert_eq!(packet.id(), id);
        prop_assert_eq!(packet.accounted_len(), data.len());

        let segments = packet.segments();
        let expected_len = fixtures.len() + usize::from(queue_samples > 0);
        prop_assert_eq!(segments.len(), expected_len);

        for (segment, fixture) in segments.iter().zip(&fixtures) {
            prop_assert_eq!(segment.attribute(), fixture.attribute);
            prop_assert_eq!(segment.chunk(), fixture.chunk);
            prop_assert_eq!(usize::from(segment.size_bytes()), fixture.payload.len());
            prop_assert_eq!(&segment.raw, &fixture.payload);
        }
        if queue_samples > 0 {
            let queue = &segments[fixtures.len()];
            prop_assert_eq!(queue.attribute(), Attribute::AdcQueue);
            prop_assert_eq!(usize::from(queue.size_bytes()), size::ADC_QUEUE_SAMPLE);
            prop_assert_eq!(
                &queue.payload,
                &km003c_protocol::SegmentPayload::AdcQueue(samples)
            );
        }
        for (i, segment) in segments.iter().enumerate() {
            prop_assert_eq!(segment.has_next(), i + 1 < segments.len());
        }
    }
}
