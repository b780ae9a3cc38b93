//! AAC 解码核心集成测试.
//!
//! 通过公开 API 覆盖完整管线:
//! raw_data_block → BitReader → Huffman → scale factor → 反量化 → 立体声,
//! 以及 ADTS 帧循环, RVLC, PS 参数解码与 IPQF.

use musique::codec::decoders::aac::{
    AacCodebooks, AacCoreDecoder, AacProfile, DecoderConfig, Ipqf, PsParameter,
    PsParameterDecoder, compute_gain, compute_inv_quant,
};
use musique::codec::{AdtsFrames, decode_adts_stream};
use musique::core::{BitReader, BitWriter, MusiqueError};

// ============================================================
// 辅助函数
// ============================================================

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mono_config() -> DecoderConfig {
    DecoderConfig {
        channel_config: 1,
        ..DecoderConfig::default()
    }
}

/// 单个 SCE, band 0 使用 CB5, 两个码字 `11000` (= (1, -1))
fn cb5_frame() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(0, 3); // SCE
    bw.write_bits(0, 4);
    bw.write_bits(100, 8); // global_gain
    bw.write_bits(0, 4); // reserved, window_sequence, window_shape
    bw.write_bits(1, 6); // max_sfb
    bw.write_bits(0, 1);
    bw.write_bits(5, 4); // sect_cb
    bw.write_bits(1, 5); // sect_len
    bw.write_bits(0, 1); // sf 差分 0
    bw.write_bits(0, 3); // pulse, tns, gain_control
    bw.write_bits(0b11000, 5);
    bw.write_bits(0b11000, 5);
    bw.write_bits(7, 3); // END
    bw.finish()
}

/// 包装为 ADTS 帧 (LC, 44100 Hz, 单声道)
fn adts_wrap(payload: &[u8]) -> Vec<u8> {
    let len = 7 + payload.len();
    let mut frame = vec![
        0xFF,
        0xF1,
        0x50,
        0x40 | ((len >> 11) as u8 & 0x03),
        (len >> 3) as u8,
        ((len & 0x07) as u8) << 5 | 0x1F,
        0xFC,
    ];
    frame.extend_from_slice(payload);
    frame
}

// ============================================================
// 帧级管线
// ============================================================

#[test]
fn test_cb5_端到端() {
    init_logger();
    let mut decoder = AacCoreDecoder::new(mono_config()).unwrap();
    let data = cb5_frame();
    let frame = decoder.decode_frame(&data).unwrap();
    assert_eq!(frame.bits_consumed, 52);

    let ch = &frame.channels[0];
    assert_eq!(&ch.quantized[..4], &[1, -1, 1, -1]);
    let expected = [1.0f32, -1.0, 1.0, -1.0];
    for (got, want) in ch.spectrum[..4].iter().zip(expected) {
        assert!((got - want).abs() < 1e-6);
    }
}

#[test]
fn test_截断位置精确() {
    init_logger();
    let mut decoder = AacCoreDecoder::new(mono_config()).unwrap();
    let data = cb5_frame();
    assert_eq!(data.len(), 7);

    // 第二个 CB5 码字从第 44 位开始, 读到第 48 位时数据耗尽
    match decoder.decode_frame(&data[..6]) {
        Err(MusiqueError::TruncatedStream {
            position,
            requested,
            available,
        }) => {
            assert_eq!(position, 48);
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("应为截断错误, 实际: {other:?}"),
    }
}

#[test]
fn test_非法码本() {
    let codebooks = AacCodebooks::build();
    let data = [0u8; 8];
    for cb in [0u8, 12, 13, 14, 15, 32, 255] {
        let mut br = BitReader::new(&data);
        assert!(matches!(
            codebooks.decode_spectral(cb, &mut br),
            Err(MusiqueError::UnsupportedCodebook(c)) if c == cb
        ));
        assert_eq!(br.bits_read(), 0);
    }
}

#[test]
fn test_rvlc_帧() {
    init_logger();
    let config = DecoderConfig {
        profile: AacProfile::ErLc,
        scalefactor_data_resilience: true,
        ..mono_config()
    };
    let mut bw = BitWriter::new();
    bw.write_bits(0, 3);
    bw.write_bits(0, 4);
    bw.write_bits(100, 8);
    bw.write_bits(0, 4);
    bw.write_bits(1, 6);
    bw.write_bits(0, 1);
    bw.write_bits(1, 4); // CB1
    bw.write_bits(1, 5);
    // RVLC
    bw.write_bits(0, 1); // sf_concealment
    bw.write_bits(101, 8); // rev_global_gain
    bw.write_bits(3, 9); // length
    bw.write_bits(0b111, 3); // +1
    bw.write_bits(0, 1); // 无 escape
    bw.write_bits(0, 3);
    bw.write_bits(0b110_1010, 7); // CB1 → [1, 0, -1, 0]
    bw.write_bits(7, 3);
    let data = bw.finish();

    let mut decoder = AacCoreDecoder::new(config).unwrap();
    let frame = decoder.decode_frame(&data).unwrap();
    let ch = &frame.channels[0];
    assert_eq!(ch.scale_factors.get(0, 0), 101);
    let side = ch.rvlc.as_ref().unwrap();
    assert_eq!(side.reverse_global_gain, 101);
    assert_eq!(side.length, 3);
    assert!((ch.spectrum[0] - 2.0f32.powf(0.25)).abs() < 1e-6);
    assert!((ch.spectrum[2] + 2.0f32.powf(0.25)).abs() < 1e-6);
}

// ============================================================
// ADTS 帧循环
// ============================================================

#[test]
fn test_adts_流恢复() {
    init_logger();
    let good = adts_wrap(&cb5_frame());
    let mut stream = good.clone();
    // 截断的 raw_data_block: 头部完整, 解码失败
    stream.extend(adts_wrap(&cb5_frame()[..5]));
    stream.extend_from_slice(&[0x12, 0x34, 0x56]);
    stream.extend_from_slice(&good);

    assert_eq!(AdtsFrames::new(&stream).count(), 3);

    let mut quantized = Vec::new();
    let stats = decode_adts_stream(&stream, |_, frame| {
        quantized.push(frame.channels[0].quantized[..4].to_vec());
    })
    .unwrap();
    assert_eq!(stats.frames_decoded, 2);
    assert_eq!(stats.frames_dropped, 1);
    assert!(quantized.iter().all(|q| q == &[1, -1, 1, -1]));
}

// ============================================================
// 数值性质
// ============================================================

#[test]
fn test_增益与反量化性质() {
    assert_eq!(compute_gain(100), 1.0);
    for sf in 1..=255 {
        assert!(compute_gain(sf) > compute_gain(sf - 1));
    }
    assert_eq!(compute_gain(-1), 0.0);
    assert_eq!(compute_gain(256), 0.0);

    let mut prev = 0.0f32;
    for q in 1..10000 {
        let pos = compute_inv_quant(q);
        let neg = compute_inv_quant(-q);
        assert!(pos > prev);
        assert_eq!(neg, -pos);
        prev = pos;
    }
    assert_eq!(compute_inv_quant(0), 0.0);
}

#[test]
fn test_ipqf_静音不漂移() {
    let mut ipqf = Ipqf::new();
    let band = vec![0.0f32; 256];
    let mut out = vec![0.0f32; 1024];
    for _ in 0..8 {
        ipqf.process([&band, &band, &band, &band], 1024, &mut out)
            .unwrap();
        assert!(out.iter().all(|&x| x == 0.0));
        assert!(ipqf.is_silent());
    }
}

#[test]
fn test_ps_参数跨帧() {
    // IPD 频率差分: 码字 1 → 差分 0, 码字 000 → 差分 1
    let mut bw = BitWriter::new();
    bw.write_bits(0b000, 3);
    bw.write_bits(0b1, 1);
    // 下一帧时间差分: 码字 1 → 差分 0
    bw.write_bits(0b1, 1);
    bw.write_bits(0b1, 1);
    let data = bw.finish();
    let mut br = BitReader::new(&data);

    let mut ps = PsParameterDecoder::new();
    let first = ps
        .decode_pars(&mut br, PsParameter::Ipd, 0, false, 2)
        .unwrap()
        .to_vec();
    assert_eq!(first, vec![1, 1]);
    ps.finish_frame(1);
    let second = ps
        .decode_pars(&mut br, PsParameter::Ipd, 0, true, 2)
        .unwrap();
    assert_eq!(second, &[1, 1]);
}
