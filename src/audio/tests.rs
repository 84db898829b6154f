use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::audio::depacketizer::Depacketizer;
use crate::audio::frame::{ChannelMask, Frame, FrameFlags};
use crate::audio::latency::{FreqEstimator, FreqEstimatorConfig};
use crate::audio::mapper::{ChannelMapper, ChannelMapperReader};
use crate::audio::mixer::Mixer;
use crate::audio::pcm::{self, FormatMap, PcmFormat};
use crate::audio::resampler::{ResamplerProfile, ScaleHandle, SincResampler};
use crate::audio::FrameReader;
use crate::packet::{Packet, PacketFlags, PacketReader};

const RATE: u32 = 44_100;

fn mono_format() -> PcmFormat {
    PcmFormat {
        sample_rate: RATE,
        channels: ChannelMask::MONO,
    }
}

/// Deterministic per-index sample value on the exact i16 grid.
fn payload_bytes(start: usize, frames: usize) -> Vec<u8> {
    let samples: Vec<f32> = (start..start + frames)
        .map(|i| f32::from((i % 2000) as i16 - 1000) / f32::from(i16::MAX))
        .collect();
    let mut bytes = Vec::new();
    pcm::encode_samples(&samples, &mut bytes);
    bytes
}

fn expected_samples(start: usize, frames: usize) -> Vec<f32> {
    let bytes = payload_bytes(start, frames);
    let mut out = vec![0.0f32; frames];
    pcm::decode_samples(&bytes, &mut out);
    out
}

fn mono_packet(seq: u16, ts: u32, frames: usize, capture: Instant) -> Arc<Packet> {
    Arc::new(Packet {
        source_id: 1,
        seqnum: seq,
        timestamp: ts,
        marker: false,
        payload_type: FormatMap::L16_MONO,
        flags: PacketFlags::AUDIO,
        payload: Bytes::from(payload_bytes(ts as usize, frames)),
        raw: Bytes::new(),
        capture_time: capture,
        fec: None,
    })
}

struct StubReader {
    packets: VecDeque<Arc<Packet>>,
}

impl StubReader {
    fn new(packets: impl IntoIterator<Item = Arc<Packet>>) -> Box<Self> {
        Box::new(Self {
            packets: packets.into_iter().collect(),
        })
    }
}

impl PacketReader for StubReader {
    fn read(&mut self) -> Option<Arc<Packet>> {
        self.packets.pop_front()
    }
}

/// Frame-reader stub producing a constant value.
struct ConstReader {
    value: f32,
    flags: FrameFlags,
    capture: Option<Instant>,
}

impl ConstReader {
    fn new(value: f32) -> Self {
        Self {
            value,
            flags: FrameFlags::empty(),
            capture: None,
        }
    }
}

impl FrameReader for ConstReader {
    fn read(&mut self, frame: &mut Frame) -> bool {
        frame.reset();
        frame.samples_mut().fill(self.value);
        frame.add_flags(self.flags);
        if let Some(at) = self.capture {
            frame.set_capture_timestamp(at);
        }
        true
    }
}

mod frame_tests {
    use super::*;

    #[test]
    fn test_channel_mask_counts() {
        assert_eq!(ChannelMask::MONO.num_channels(), 1);
        assert_eq!(ChannelMask::STEREO.num_channels(), 2);
        assert_eq!(ChannelMask::SURROUND_5_1.num_channels(), 6);
        assert!(ChannelMask::STEREO.has(ChannelMask::FRONT_LEFT));
        assert!(!ChannelMask::MONO.has(ChannelMask::FRONT_RIGHT));
    }

    #[test]
    fn test_frame_reset_clears_flags() {
        let mut frame = Frame::new(RATE, ChannelMask::STEREO, 64);
        frame.add_flags(FrameFlags::INCOMPLETE);
        frame.set_capture_timestamp(Instant::now());

        frame.reset();
        assert_eq!(frame.flags(), FrameFlags::empty());
        assert!(frame.capture_timestamp().is_none());
        assert_eq!(frame.num_frames(), 64);
    }

    #[test]
    fn test_pcm_decode_encode_roundtrip() {
        let bytes = payload_bytes(0, 128);
        let mut samples = vec![0.0f32; 128];
        pcm::decode_samples(&bytes, &mut samples);

        let mut back = Vec::new();
        pcm::encode_samples(&samples, &mut back);
        assert_eq!(bytes, back);
    }

    #[test]
    fn test_format_map_statics() {
        let map = FormatMap::new();
        assert_eq!(
            map.get(FormatMap::L16_STEREO).unwrap().channels,
            ChannelMask::STEREO
        );
        assert_eq!(
            map.get(FormatMap::L16_MONO).unwrap().channels,
            ChannelMask::MONO
        );
        assert!(map.get(96).is_none());
    }
}

mod depacketizer_tests {
    use super::*;

    const FRAMES: usize = 320;

    #[test]
    fn test_lossless_stream_is_identity() {
        let capture = Instant::now();
        let packets =
            (0..5u16).map(|i| mono_packet(i, u32::from(i) * FRAMES as u32, FRAMES, capture));
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), false);

        assert!(!dp.started());

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        for i in 0..5usize {
            assert!(dp.read(&mut frame));
            assert_eq!(frame.flags(), FrameFlags::empty(), "frame {i}");
            assert_eq!(frame.samples(), &expected_samples(i * FRAMES, FRAMES)[..]);
        }

        assert!(dp.started());
        assert_eq!(dp.next_timestamp(), 5 * FRAMES as u32);
        assert_eq!(dp.stats().decoded_samples, 5 * FRAMES as u64);
        assert_eq!(dp.stats().missing_samples, 0);
    }

    #[test]
    fn test_lost_packet_becomes_silent_gap() {
        let capture = Instant::now();
        let packets = [0u16, 1, 3, 4]
            .iter()
            .map(|&i| mono_packet(i, u32::from(i) * FRAMES as u32, FRAMES, capture));
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), false);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);

        for _ in 0..2 {
            assert!(dp.read(&mut frame));
            assert_eq!(frame.flags(), FrameFlags::empty());
        }

        // Frame covering the lost packet: interpolated silence, not an
        // idle stream.
        assert!(dp.read(&mut frame));
        assert!(frame.flags().contains(FrameFlags::INCOMPLETE));
        assert!(frame.flags().contains(FrameFlags::SILENT));
        assert!(!frame.flags().contains(FrameFlags::EMPTY));
        assert!(frame.samples().iter().all(|&s| s == 0.0));

        // Stream resumes exactly where it should.
        assert!(dp.read(&mut frame));
        assert_eq!(frame.flags(), FrameFlags::empty());
        assert_eq!(frame.samples(), &expected_samples(3 * FRAMES, FRAMES)[..]);
    }

    #[test]
    fn test_partial_gap_sets_incomplete() {
        let capture = Instant::now();
        // Second packet starts half a frame late.
        let packets = vec![
            mono_packet(0, 0, FRAMES / 2, capture),
            mono_packet(1, FRAMES as u32, FRAMES, capture),
        ];
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), false);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        assert!(dp.read(&mut frame));
        assert!(frame.flags().contains(FrameFlags::INCOMPLETE));
        // First half decoded, second half silence.
        assert_eq!(
            &frame.samples()[..FRAMES / 2],
            &expected_samples(0, FRAMES / 2)[..]
        );
        assert!(frame.samples()[FRAMES / 2..].iter().all(|&s| s == 0.0));
        assert_eq!(dp.stats().missing_samples, FRAMES as u64 / 2);
    }

    #[test]
    fn test_stale_packet_dropped_and_flagged() {
        let capture = Instant::now();
        let packets = vec![
            mono_packet(10, 10 * FRAMES as u32, FRAMES, capture),
            // Far in the past relative to the cursor.
            mono_packet(2, 2 * FRAMES as u32, FRAMES, capture),
            mono_packet(11, 11 * FRAMES as u32, FRAMES, capture),
        ];
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), false);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        assert!(dp.read(&mut frame)); // packet 10
        assert!(dp.read(&mut frame)); // drops stale, decodes 11
        assert!(frame.flags().contains(FrameFlags::DROPS));
        assert_eq!(frame.samples(), &expected_samples(11 * FRAMES, FRAMES)[..]);
        assert_eq!(dp.stats().late_packets, 1);
    }

    #[test]
    fn test_no_packets_is_empty_silence() {
        let mut dp = Depacketizer::new(StubReader::new(vec![]), mono_format(), false);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        assert!(dp.read(&mut frame));
        assert!(frame.flags().contains(FrameFlags::EMPTY));
        assert!(frame.flags().contains(FrameFlags::SILENT));
        assert!(!dp.started());
        assert!(frame.capture_timestamp().is_none());
    }

    #[test]
    fn test_capture_timestamp_tracks_cursor() {
        let capture = Instant::now();
        let packets = vec![mono_packet(0, 1000, FRAMES, capture)];
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), false);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        assert!(dp.read(&mut frame));
        assert_eq!(frame.capture_timestamp(), Some(capture));
    }

    #[test]
    fn test_beep_mode_fills_gaps_audibly() {
        let capture = Instant::now();
        let packets = vec![
            mono_packet(0, 0, FRAMES, capture),
            mono_packet(2, 2 * FRAMES as u32, FRAMES, capture),
        ];
        let mut dp = Depacketizer::new(StubReader::new(packets), mono_format(), true);

        let mut frame = Frame::new(RATE, ChannelMask::MONO, FRAMES);
        assert!(dp.read(&mut frame));

        // The gap frame carries the beep, not silence.
        assert!(dp.read(&mut frame));
        assert!(frame.flags().contains(FrameFlags::INCOMPLETE));
        assert!(!frame.flags().contains(FrameFlags::SILENT));
        assert!(frame.samples().iter().any(|&s| s.abs() > 0.1));
    }
}

mod latency_tests {
    use super::*;

    #[test]
    fn test_scale_stays_unity_on_target() {
        let mut fe = FreqEstimator::new(FreqEstimatorConfig::default(), 8820.0);
        for _ in 0..1000 {
            fe.update(8820.0);
        }
        assert!((fe.freq_coeff() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_rises_when_latency_high() {
        let mut fe = FreqEstimator::new(FreqEstimatorConfig::default(), 8820.0);
        for _ in 0..10_000 {
            fe.update(30_000.0);
        }
        let coeff = fe.freq_coeff();
        assert!(coeff > 1.0);
        assert!(coeff <= 1.005 + 1e-9);
    }

    #[test]
    fn test_scale_falls_when_latency_low() {
        let mut fe = FreqEstimator::new(FreqEstimatorConfig::default(), 8820.0);
        for _ in 0..10_000 {
            fe.update(100.0);
        }
        let coeff = fe.freq_coeff();
        assert!(coeff < 1.0);
        assert!(coeff >= 0.995 - 1e-9);
    }

    #[test]
    fn test_closed_loop_locks_to_sender_skew() {
        // Plant: the sender runs 0.1% fast; every 320-sample frame the
        // buffer grows by the skew and shrinks by what the resampler
        // consumed.
        let target = 8820.0f64;
        let skew = 1.001f64;
        let frame = 320.0f64;

        let mut fe = FreqEstimator::new(FreqEstimatorConfig::default(), target);
        let mut latency = target;

        for _ in 0..200_000 {
            fe.update(latency);
            latency += frame * (skew - fe.freq_coeff());
        }

        // Locked: latency back within 5 ms of target, scale tracking the
        // skew within 0.01%.
        assert!((latency - target).abs() < 220.0, "latency {latency}");
        assert!((fe.freq_coeff() - skew).abs() < 1e-4);
    }
}

mod resampler_tests {
    use super::*;

    #[test]
    fn test_dc_gain_is_unity() {
        let scale = ScaleHandle::new();
        let mut rs = SincResampler::new(
            Box::new(ConstReader::new(0.25)),
            48_000,
            44_100,
            1,
            64,
            ResamplerProfile::Medium,
            scale,
            Vec::new(),
        );

        let mut frame = Frame::new(44_100, ChannelMask::MONO, 256);
        assert!(rs.read(&mut frame));
        for (i, &s) in frame.samples().iter().enumerate() {
            assert!((s - 0.25).abs() < 1e-3, "sample {i} = {s}");
        }
    }

    #[test]
    fn test_consumption_matches_ratio() {
        let scale = ScaleHandle::new();
        let mut rs = SincResampler::new(
            Box::new(ConstReader::new(0.0)),
            48_000,
            44_100,
            1,
            64,
            ResamplerProfile::Medium,
            scale,
            Vec::new(),
        );

        let produced = 10 * 441usize;
        let mut frame = Frame::new(44_100, ChannelMask::MONO, 441);
        for _ in 0..10 {
            assert!(rs.read(&mut frame));
        }

        // 4410 output frames at 48/44.1 consume 4800 input frames, give
        // or take the kernel history.
        let step = 48_000.0 / 44_100.0;
        let expected = (produced as f64 * step).floor();
        let consumed = rs.frames_consumed();
        let slack = 16.0 + 2.0;
        assert!(
            (consumed as f64 - expected).abs() <= slack,
            "consumed {consumed}, expected about {expected}"
        );
    }

    #[test]
    fn test_scale_changes_consumption() {
        let run = |scale_value: f64| -> u64 {
            let scale = ScaleHandle::new();
            scale.set(scale_value);
            let mut rs = SincResampler::new(
                Box::new(ConstReader::new(0.0)),
                44_100,
                44_100,
                1,
                64,
                ResamplerProfile::Low,
                scale,
                Vec::new(),
            );
            let mut frame = Frame::new(44_100, ChannelMask::MONO, 441);
            for _ in 0..20 {
                assert!(rs.read(&mut frame));
            }
            rs.frames_consumed()
        };

        let nominal = run(1.0);
        let fast = run(1.005);
        assert!(fast > nominal, "fast {fast} <= nominal {nominal}");
    }

    #[test]
    fn test_flags_propagate_through_resampler() {
        let scale = ScaleHandle::new();
        let mut inner = ConstReader::new(0.0);
        inner.flags = FrameFlags::INCOMPLETE;
        let mut rs = SincResampler::new(
            Box::new(inner),
            44_100,
            44_100,
            1,
            64,
            ResamplerProfile::Low,
            scale,
            Vec::new(),
        );

        let mut frame = Frame::new(44_100, ChannelMask::MONO, 128);
        assert!(rs.read(&mut frame));
        assert!(frame.flags().contains(FrameFlags::INCOMPLETE));
    }
}

mod mapper_tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mapper = ChannelMapper::new(ChannelMask::MONO, ChannelMask::STEREO);
        let input = [0.5f32, -0.25];
        let mut output = [0.0f32; 4];
        mapper.map(&input, &mut output);
        assert_eq!(output, [0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mapper = ChannelMapper::new(ChannelMask::STEREO, ChannelMask::MONO);
        let input = [1.0f32, 0.5, -1.0, -0.5];
        let mut output = [0.0f32; 2];
        mapper.map(&input, &mut output);
        assert_eq!(output, [0.75, -0.75]);
    }

    #[test]
    fn test_surround_downmix_weights() {
        let mapper = ChannelMapper::new(ChannelMask::SURROUND_5_1, ChannelMask::STEREO);
        // FL FR FC LFE BL BR
        let input = [0.2f32, 0.1, 0.4, 0.9, 0.2, 0.0];
        let mut output = [0.0f32; 2];
        mapper.map(&input, &mut output);

        let w = std::f32::consts::FRAC_1_SQRT_2;
        assert!((output[0] - (0.2 + w * (0.4 + 0.2))).abs() < 1e-6);
        assert!((output[1] - (0.1 + w * 0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_to_surround_zero_fills() {
        let mapper = ChannelMapper::new(ChannelMask::STEREO, ChannelMask::SURROUND_5_1);
        let input = [0.3f32, -0.3];
        let mut output = [9.0f32; 6];
        mapper.map(&input, &mut output);
        assert_eq!(output, [0.3, -0.3, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_identity_reader_passes_through() {
        let mut inner = ConstReader::new(0.7);
        inner.flags = FrameFlags::DROPS;
        let mut reader = ChannelMapperReader::new(
            Box::new(inner),
            RATE,
            ChannelMask::STEREO,
            ChannelMask::STEREO,
            64,
            Vec::new(),
        );

        let mut frame = Frame::new(RATE, ChannelMask::STEREO, 32);
        assert!(reader.read(&mut frame));
        assert!(frame.samples().iter().all(|&s| (s - 0.7).abs() < 1e-6));
        assert!(frame.flags().contains(FrameFlags::DROPS));
    }

    #[test]
    fn test_mapping_reader_converts() {
        let mut reader = ChannelMapperReader::new(
            Box::new(ConstReader::new(0.4)),
            RATE,
            ChannelMask::MONO,
            ChannelMask::STEREO,
            64,
            Vec::new(),
        );

        let mut frame = Frame::new(RATE, ChannelMask::STEREO, 16);
        assert!(reader.read(&mut frame));
        assert_eq!(frame.num_frames(), 16);
        assert!(frame.samples().iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }
}

mod mixer_tests {
    use super::*;

    #[test]
    fn test_sum_saturates() {
        let template = Frame::new(RATE, ChannelMask::MONO, 32);
        let mut mixer = Mixer::new(template);

        let mut a = ConstReader::new(0.8);
        let mut b = ConstReader::new(0.8);
        let mut inputs: Vec<&mut dyn FrameReader> = vec![&mut a, &mut b];

        let mut out = Frame::new(RATE, ChannelMask::MONO, 32);
        let contributors = mixer.mix(&mut inputs, &mut out);

        assert_eq!(contributors, 2);
        assert!(out.samples().iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_empty_contributes_zero() {
        let template = Frame::new(RATE, ChannelMask::MONO, 16);
        let mut mixer = Mixer::new(template);

        let mut a = ConstReader::new(0.5);
        let mut b = ConstReader::new(0.9);
        b.flags = FrameFlags::EMPTY;
        let mut inputs: Vec<&mut dyn FrameReader> = vec![&mut a, &mut b];

        let mut out = Frame::new(RATE, ChannelMask::MONO, 16);
        let contributors = mixer.mix(&mut inputs, &mut out);

        assert_eq!(contributors, 1);
        assert!(out.samples().iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_no_contributors_is_empty_silence() {
        let template = Frame::new(RATE, ChannelMask::MONO, 16);
        let mut mixer = Mixer::new(template);

        let mut inputs: Vec<&mut dyn FrameReader> = vec![];
        let mut out = Frame::new(RATE, ChannelMask::MONO, 16);
        let contributors = mixer.mix(&mut inputs, &mut out);

        assert_eq!(contributors, 0);
        assert!(out.flags().contains(FrameFlags::EMPTY));
        assert!(out.flags().contains(FrameFlags::SILENT));
        assert!(out.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_incomplete_contributes_but_empty_does_not() {
        let template = Frame::new(RATE, ChannelMask::MONO, 16);
        let mut mixer = Mixer::new(template);

        let base = Instant::now();
        // A gap-filled but started session still contributes.
        let mut a = ConstReader::new(0.3);
        a.flags = FrameFlags::INCOMPLETE;
        a.capture = Some(base);
        // A never-started session does not.
        let mut b = ConstReader::new(0.9);
        b.flags = FrameFlags::EMPTY | FrameFlags::SILENT;
        b.capture = Some(base + Duration::from_millis(40));
        let mut inputs: Vec<&mut dyn FrameReader> = vec![&mut a, &mut b];

        let mut out = Frame::new(RATE, ChannelMask::MONO, 16);
        let contributors = mixer.mix(&mut inputs, &mut out);

        assert_eq!(contributors, 1);
        assert!(out.flags().contains(FrameFlags::INCOMPLETE));
        assert!(!out.flags().contains(FrameFlags::EMPTY));
        assert!(out.samples().iter().all(|&s| (s - 0.3).abs() < 1e-6));
        assert_eq!(out.capture_timestamp(), Some(base));
    }

    #[test]
    fn test_capture_timestamp_is_median() {
        let template = Frame::new(RATE, ChannelMask::MONO, 8);
        let mut mixer = Mixer::new(template);

        let base = Instant::now();
        let mut a = ConstReader::new(0.1);
        a.capture = Some(base);
        let mut b = ConstReader::new(0.1);
        b.capture = Some(base + Duration::from_millis(10));
        let mut c = ConstReader::new(0.1);
        c.capture = Some(base + Duration::from_millis(50));
        let mut inputs: Vec<&mut dyn FrameReader> = vec![&mut a, &mut b, &mut c];

        let mut out = Frame::new(RATE, ChannelMask::MONO, 8);
        mixer.mix(&mut inputs, &mut out);

        assert_eq!(
            out.capture_timestamp(),
            Some(base + Duration::from_millis(10))
        );
    }
}
