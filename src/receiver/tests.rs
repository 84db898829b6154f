use std::time::Duration;

use crate::audio::frame::{ChannelMask, Frame, FrameFlags};
use crate::audio::pcm::{self, FormatMap};
use crate::error::Error;
use crate::fec::{BlockCodec, Rs8mCodec};
use crate::packet::factory::Context;
use crate::packet::fec::{ldpc_seed, FecScheme};
use crate::packet::rtp::{self, ComposeParams};
use crate::packet::units::SourceId;
use crate::packet::FecMeta;
use crate::receiver::{EndpointKind, Receiver, ReceiverConfig};
use crate::session::SessionError;

const FRAMES: usize = 320;

fn test_config() -> ReceiverConfig {
    ReceiverConfig {
        target_latency: Duration::ZERO,
        min_latency: Duration::ZERO,
        internal_frame_length: Duration::from_micros(7256),
        sample_rate: 44_100,
        channel_mask: ChannelMask::MONO,
        rate_adaptation: false,
        ..ReceiverConfig::default()
    }
}

fn constant_payload(value: f32) -> Vec<u8> {
    let samples = vec![value; FRAMES];
    let mut bytes = Vec::new();
    pcm::encode_samples(&samples, &mut bytes);
    bytes
}

fn audio_datagram(source_id: SourceId, seq: u16, value: f32) -> Vec<u8> {
    let params = ComposeParams {
        source_id,
        seqnum: seq,
        timestamp: u32::from(seq) * FRAMES as u32,
        payload_type: FormatMap::L16_MONO,
        marker: false,
    };
    rtp::compose_audio(&params, &constant_payload(value)).to_vec()
}

#[test]
fn test_single_session_end_to_end() {
    let mut receiver = Receiver::new(test_config(), Context::default()).unwrap();
    let ingress = receiver.ingress();

    for seq in 0..5u16 {
        ingress
            .receive(&audio_datagram(0x1001, seq, 0.5), EndpointKind::AudioSource)
            .unwrap();
    }

    let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
    for _ in 0..5 {
        let contributors = receiver.read_frame(&mut frame);
        assert_eq!(contributors, 1);
        assert!(frame.samples().iter().all(|&s| (s - 0.5).abs() < 1e-3));
    }
    assert_eq!(receiver.num_sessions(), 1);
}

#[test]
fn test_two_sessions_mix_and_saturate() {
    let mut receiver = Receiver::new(test_config(), Context::default()).unwrap();
    let ingress = receiver.ingress();

    for seq in 0..3u16 {
        ingress
            .receive(&audio_datagram(0xAAAA, seq, 0.8), EndpointKind::AudioSource)
            .unwrap();
        ingress
            .receive(&audio_datagram(0xBBBB, seq, 0.8), EndpointKind::AudioSource)
            .unwrap();
    }

    let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
    let contributors = receiver.read_frame(&mut frame);
    assert_eq!(contributors, 2);
    assert_eq!(receiver.num_sessions(), 2);

    // 0.8 + 0.8 saturates at full scale, never 1.6.
    assert!(frame.samples().iter().all(|&s| (s - 1.0).abs() < 1e-3));
}

#[test]
fn test_lost_packet_surfaces_as_incomplete_frame() {
    let config = ReceiverConfig {
        reorder_window: 4,
        ..test_config()
    };
    let mut receiver = Receiver::new(config, Context::default()).unwrap();
    let ingress = receiver.ingress();

    for seq in 0..10u16 {
        if seq == 4 {
            continue; // lost in the network
        }
        ingress
            .receive(&audio_datagram(0x1001, seq, 0.5), EndpointKind::AudioSource)
            .unwrap();
    }

    let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
    let mut gap_frames = 0;
    for _ in 0..10 {
        receiver.read_frame(&mut frame);
        if frame.flags().contains(FrameFlags::INCOMPLETE) {
            gap_frames += 1;
            assert!(!frame.flags().contains(FrameFlags::EMPTY));
            assert!(frame.samples().iter().all(|&s| s == 0.0));
        } else {
            assert!(frame.samples().iter().all(|&s| (s - 0.5).abs() < 1e-3));
        }
    }
    assert_eq!(gap_frames, 1);
}

#[test]
fn test_dead_session_reaped_and_output_silent() {
    let config = ReceiverConfig {
        no_play_timeout: Duration::from_micros(7256 * 3),
        ..test_config()
    };
    let mut receiver = Receiver::new(config, Context::default()).unwrap();
    let ingress = receiver.ingress();

    for seq in 0..2u16 {
        ingress
            .receive(&audio_datagram(0x1001, seq, 0.5), EndpointKind::AudioSource)
            .unwrap();
    }

    let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
    for _ in 0..2 {
        assert_eq!(receiver.read_frame(&mut frame), 1);
    }

    // Starve until the watchdog trips and the session is reaped.
    for _ in 0..10 {
        receiver.read_frame(&mut frame);
    }
    assert_eq!(receiver.num_sessions(), 0);

    // Output is pure silence afterwards.
    assert_eq!(receiver.read_frame(&mut frame), 0);
    assert!(frame.flags().contains(FrameFlags::SILENT));
    assert!(frame.samples().iter().all(|&s| s == 0.0));
}

#[test]
fn test_unknown_payload_type_is_rejected() {
    let mut receiver = Receiver::new(test_config(), Context::default()).unwrap();
    let ingress = receiver.ingress();

    let params = ComposeParams {
        source_id: 0x1001,
        seqnum: 0,
        timestamp: 0,
        payload_type: 96, // dynamic, not registered
        marker: false,
    };
    let datagram = rtp::compose_audio(&params, &constant_payload(0.1));

    let err = ingress
        .receive(&datagram, EndpointKind::AudioSource)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::UnknownPayloadType(96))
    ));
    let _ = receiver.read_frame(&mut Frame::new(44_100, ChannelMask::MONO, FRAMES));
    assert_eq!(receiver.num_sessions(), 0);
}

#[test]
fn test_malformed_datagram_is_rejected() {
    let receiver = Receiver::new(test_config(), Context::default()).unwrap();
    let ingress = receiver.ingress();

    assert!(matches!(
        ingress.receive(&[0x00, 0x01], EndpointKind::AudioSource),
        Err(Error::Packet(_))
    ));
}

mod fec_end_to_end {
    use super::*;

    const K: usize = 10;
    const M: usize = 5;

    fn fec_config() -> ReceiverConfig {
        ReceiverConfig {
            fec_encoding: FecScheme::Rs8m,
            fec_source_block: K,
            fec_repair_block: M,
            ..test_config()
        }
    }

    fn block_datagrams(source_id: SourceId, block: u32) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let base = block * K as u32;
        let sources: Vec<Vec<u8>> = (0..K)
            .map(|i| {
                let params = ComposeParams {
                    source_id,
                    seqnum: (base as u16).wrapping_add(i as u16),
                    timestamp: (base + i as u32) * FRAMES as u32,
                    payload_type: FormatMap::L16_MONO,
                    marker: false,
                };
                rtp::compose_source(
                    &params,
                    block,
                    i as u16,
                    &constant_payload(0.25),
                )
                .to_vec()
            })
            .collect();

        let mut codec = Rs8mCodec::new();
        let symbols = codec.encode(&sources, M, ldpc_seed(block));
        let repairs = symbols
            .iter()
            .enumerate()
            .map(|(j, symbol)| {
                let params = ComposeParams {
                    source_id,
                    seqnum: 50_000u16.wrapping_add(j as u16),
                    timestamp: base * FRAMES as u32,
                    payload_type: FormatMap::L16_MONO,
                    marker: false,
                };
                let meta = FecMeta {
                    block_number: block,
                    source_block_size: K,
                    repair_block_size: M,
                    encoding_symbol_id: K + j,
                };
                rtp::compose_repair(&params, FecScheme::Rs8m, &meta, symbol).to_vec()
            })
            .collect();

        (sources, repairs)
    }

    #[test]
    fn test_complete_block_plays_clean() {
        let mut receiver = Receiver::new(fec_config(), Context::default()).unwrap();
        let ingress = receiver.ingress();

        let (sources, _) = block_datagrams(0x2002, 0);
        for datagram in &sources {
            ingress
                .receive(datagram, EndpointKind::AudioSource)
                .unwrap();
        }

        let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
        for i in 0..K {
            let contributors = receiver.read_frame(&mut frame);
            assert_eq!(contributors, 1, "frame {i}");
            assert_eq!(frame.flags(), FrameFlags::empty(), "frame {i}");
            assert!(frame.samples().iter().all(|&s| (s - 0.25).abs() < 1e-3));
        }
    }

    #[test]
    fn test_losses_recovered_bit_exact() {
        let mut receiver = Receiver::new(fec_config(), Context::default()).unwrap();
        let ingress = receiver.ingress();

        let (sources, repairs) = block_datagrams(0x2002, 0);
        for (i, datagram) in sources.iter().enumerate() {
            if [3, 5, 7].contains(&i) {
                continue; // lost in the network
            }
            ingress
                .receive(datagram, EndpointKind::AudioSource)
                .unwrap();
        }
        for datagram in &repairs {
            ingress
                .receive(datagram, EndpointKind::AudioRepair)
                .unwrap();
        }

        // The block is incomplete; it closes after its age threshold.
        std::thread::sleep(Duration::from_millis(160));

        let mut frame = Frame::new(44_100, ChannelMask::MONO, FRAMES);
        for i in 0..K {
            receiver.read_frame(&mut frame);
            assert_eq!(frame.flags(), FrameFlags::empty(), "frame {i}");
            assert!(
                frame.samples().iter().all(|&s| (s - 0.25).abs() < 1e-3),
                "frame {i}"
            );
        }
    }
}
