//! 可逆变长码 (RVLC) scale factor 解码 (ER AAC, ISO 14496-3 8.5.3).
//!
//! 解码分两遍进行:
//! 1. 正向遍: 在长度受限的子读取器上逐 band 解码 DPCM 差分, 值 ±7 只做标记;
//! 2. escape 遍: 正向遍完成后, 在独立区域内为标记过的 band 读取 escape 幅度,
//!    并把同一累加器上的偏移传递给其后所有 band.
//!
//! 正向遍不读取也不依赖 escape 区域的任何数据.

use log::{debug, trace};
use musique_core::bitreader::BitReader;
use musique_core::MusiqueResult;

use super::huffman::{CodebookTable, ESCAPE_MAX_BITS, read_escape};
use super::ics::{BandType, IcsInfo, ScaleFactorGrid, SectionData};

/// 触发 escape 的 RVLC 差分值
const ESCAPE_FLAG: i32 = 7;

/// RVLC 码表: 15 个对称码字, 值 -7..=7
#[rustfmt::skip]
const RVLC_BOOK: [(u32, u8, i32); 15] = [
    (0b0, 1, 0),
    (0b101, 3, -1),
    (0b111, 3, 1),
    (0b1001, 4, -2),
    (0b10001, 5, -3),
    (0b11011, 5, 2),
    (0b100001, 6, -4),
    (0b110011, 6, 3),
    (0b1000001, 7, -7),
    (0b1100011, 7, 7),
    (0b1101011, 7, 4),
    (0b10000001, 8, -5),
    (0b11000011, 8, 5),
    (0b100000001, 9, -6),
    (0b110101011, 9, 6),
];

/// 差分所属的累加器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Global,
    Intensity,
    Noise,
}

fn accumulator_of(band_type: BandType) -> Option<Accumulator> {
    match band_type {
        BandType::Zero => None,
        BandType::Intensity { .. } => Some(Accumulator::Intensity),
        BandType::Noise => Some(Accumulator::Noise),
        BandType::Spectral(_) => Some(Accumulator::Global),
    }
}

/// band 上的 escape 标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMark {
    Up,
    Down,
}

/// rvlc_scale_factor_data 的旁路信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RvlcSideInfo {
    pub sf_concealment: bool,
    pub reverse_global_gain: u8,
    /// 正向区域长度 (位)
    pub length: usize,
    /// escape 区域长度 (位), 无 escape 时为 None
    pub escapes_length: Option<usize>,
    /// 最后一个 IS position (供反向解码使用)
    pub last_intensity_position: i32,
}

/// RVLC scale factor 解码器
#[derive(Debug, Clone)]
pub struct RvlcDecoder {
    book: CodebookTable,
}

impl Default for RvlcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RvlcDecoder {
    pub fn new() -> Self {
        Self {
            book: CodebookTable::new("rvlc", RVLC_BOOK),
        }
    }

    /// 解码一个 RVLC 差分值
    pub fn decode_symbol(&self, br: &mut BitReader) -> MusiqueResult<i32> {
        self.book.walk(br)
    }

    /// 解码 RVLC scale factor 数据
    ///
    /// `br` 结束于 escape 区域之后.
    pub fn decode(
        &self,
        br: &mut BitReader,
        global_gain: i32,
        info: &IcsInfo,
        sections: &SectionData,
    ) -> MusiqueResult<(ScaleFactorGrid, RvlcSideInfo)> {
        let length_bits = if info.is_eight_short() { 11 } else { 9 };
        let mut side = RvlcSideInfo {
            sf_concealment: br.read_bool()?,
            reverse_global_gain: br.read_bits(8)? as u8,
            ..Default::default()
        };
        side.length = br.read_bits(length_bits)? as usize;

        let mut grid = ScaleFactorGrid::new(info.num_window_groups, info.max_sfb)?;
        let mut marks = vec![None; info.num_window_groups * info.max_sfb];

        // 正向遍
        let mut forward = br.sub_reader(side.length)?;
        let intensity_used = self.forward_pass(
            &mut forward,
            global_gain,
            info,
            sections,
            &mut grid,
            &mut marks,
        )?;
        if intensity_used {
            side.last_intensity_position = self.decode_symbol(&mut forward)?;
        }
        br.skip_bits(side.length)?;

        // escape 遍
        if br.read_bool()? {
            let escapes_length = br.read_bits(8)? as usize;
            side.escapes_length = Some(escapes_length);
            let mut escapes = br.sub_reader(escapes_length)?;
            apply_escapes(&mut escapes, info, sections, &mut grid, &marks)?;
            br.skip_bits(escapes_length)?;
        }

        debug!(
            "AAC RVLC: length={}, escapes={:?}, concealment={}",
            side.length, side.escapes_length, side.sf_concealment
        );
        Ok((grid, side))
    }

    fn forward_pass(
        &self,
        br: &mut BitReader,
        global_gain: i32,
        info: &IcsInfo,
        sections: &SectionData,
        grid: &mut ScaleFactorGrid,
        marks: &mut [Option<EscapeMark>],
    ) -> MusiqueResult<bool> {
        let mut sf = global_gain;
        let mut is_position = 0i32;
        let mut noise_energy = 0i32;
        let mut intensity_used = false;
        let mut noise_used = false;

        for group in 0..info.num_window_groups {
            for sfb in 0..info.max_sfb {
                let band_type = sections.band_type(group, sfb);
                let Some(acc) = accumulator_of(band_type) else {
                    grid.set(group, sfb, 0);
                    continue;
                };

                let delta = self.decode_symbol(br)?;
                let value = match acc {
                    Accumulator::Intensity => {
                        intensity_used = true;
                        is_position += delta;
                        is_position
                    }
                    Accumulator::Noise if !noise_used => {
                        noise_used = true;
                        noise_energy = delta;
                        grid.set(group, sfb, noise_energy);
                        continue;
                    }
                    Accumulator::Noise => {
                        noise_energy += delta;
                        noise_energy
                    }
                    Accumulator::Global => {
                        sf += delta;
                        sf
                    }
                };
                grid.set(group, sfb, value);

                if delta.abs() == ESCAPE_FLAG {
                    marks[group * info.max_sfb + sfb] = Some(if delta > 0 {
                        EscapeMark::Up
                    } else {
                        EscapeMark::Down
                    });
                }
            }
        }
        Ok(intensity_used)
    }
}

/// 按 band 顺序读取 escape 幅度并修正 scale factor
///
/// 每个 escape 偏移作用于该 band 及其后同一累加器的所有 band.
fn apply_escapes(
    br: &mut BitReader,
    info: &IcsInfo,
    sections: &SectionData,
    grid: &mut ScaleFactorGrid,
    marks: &[Option<EscapeMark>],
) -> MusiqueResult<()> {
    for group in 0..info.num_window_groups {
        for sfb in 0..info.max_sfb {
            let Some(mark) = marks[group * info.max_sfb + sfb] else {
                continue;
            };
            let Some(acc) = accumulator_of(sections.band_type(group, sfb)) else {
                continue;
            };
            let magnitude = read_escape(br, ESCAPE_MAX_BITS)?;
            let delta = match mark {
                EscapeMark::Up => magnitude,
                EscapeMark::Down => -magnitude,
            };
            trace!("AAC RVLC escape: group={}, sfb={}, delta={}", group, sfb, delta);
            grid.shift_from(group, sfb, delta, |g, b| {
                accumulator_of(sections.band_type(g, b)) == Some(acc)
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::aac::config::DecoderConfig;
    use musique_core::{BitWriter, MusiqueError};

    fn layout(max_sfb: usize, codebooks: &[(u8, u32)]) -> (IcsInfo, SectionData) {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(max_sfb as u32, 6);
        bw.write_bits(0, 1);
        for &(cb, len) in codebooks {
            bw.write_bits(u32::from(cb), 4);
            bw.write_bits(len, 5);
        }
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let info = IcsInfo::parse(&mut br, &DecoderConfig::default()).unwrap();
        let sections = SectionData::parse(&mut br, &info, false).unwrap();
        (info, sections)
    }

    #[test]
    fn test_码表对称且无前缀冲突() {
        for &(code, len, _) in &RVLC_BOOK {
            let mut rev = 0u32;
            for i in 0..len {
                rev = (rev << 1) | ((code >> i) & 1);
            }
            assert_eq!(rev, code, "码字 {code:b} 不对称");
        }
        for (i, a) in RVLC_BOOK.iter().enumerate() {
            for b in RVLC_BOOK.iter().skip(i + 1) {
                let (short, long) = if a.1 <= b.1 { (a, b) } else { (b, a) };
                assert_ne!(long.0 >> (long.1 - short.1), short.0);
            }
        }
    }

    #[test]
    fn test_正向遍() {
        let (info, sections) = layout(4, &[(1, 2), (0, 1), (15, 1)]);
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1); // concealment
        bw.write_bits(120, 8); // reverse global gain
        bw.write_bits(13, 9); // length
        bw.write_bits(0b111, 3); // +1
        bw.write_bits(0b1001, 4); // -2
        bw.write_bits(0b11011, 5); // IS +2
        bw.write_bits(0b0, 1); // last IS position 0
        bw.write_bits(0, 1); // 无 escape
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let (grid, side) = RvlcDecoder::new()
            .decode(&mut br, 100, &info, &sections)
            .unwrap();
        assert!(side.sf_concealment);
        assert_eq!(side.reverse_global_gain, 120);
        assert_eq!(side.escapes_length, None);
        assert_eq!(grid.get(0, 0), 101);
        assert_eq!(grid.get(0, 1), 99);
        assert_eq!(grid.get(0, 2), 0);
        assert_eq!(grid.get(0, 3), 2);
        assert_eq!(br.bits_read(), 1 + 8 + 9 + 13 + 1);
    }

    #[test]
    fn test_escape_传递到后续同类band() {
        // band 0,1,2 普通, band 3 噪声
        let (info, sections) = layout(4, &[(1, 3), (13, 1)]);
        let mut bw = BitWriter::new();
        bw.write_bits(0, 1);
        bw.write_bits(0, 8);
        bw.write_bits(7 + 7 + 1 + 1, 9);
        bw.write_bits(0b1100011, 7); // +7 (escape 上)
        bw.write_bits(0b1000001, 7); // -7 (escape 下)
        bw.write_bits(0b0, 1); // 0
        bw.write_bits(0b0, 1); // 噪声基准 0
        bw.write_bits(1, 1); // escape 存在
        bw.write_bits(10, 8); // escape 长度
        // band 0: 前缀 "0" 宽度 4, 尾数 0b0001 → 17
        bw.write_bits(0, 1);
        bw.write_bits(0b0001, 4);
        // band 1: 前缀 "0", 尾数 0b0000 → 16
        bw.write_bits(0, 1);
        bw.write_bits(0b0000, 4);
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let (grid, side) = RvlcDecoder::new()
            .decode(&mut br, 100, &info, &sections)
            .unwrap();
        assert_eq!(side.escapes_length, Some(10));
        // 正向值: 107, 100, 100; escape: +17 作用于 0..3, -16 作用于 1..3
        assert_eq!(grid.get(0, 0), 124);
        assert_eq!(grid.get(0, 1), 101);
        assert_eq!(grid.get(0, 2), 101);
        // 噪声累加器不受影响
        assert_eq!(grid.get(0, 3), 0);
        assert_eq!(br.bits_read(), 1 + 8 + 9 + 16 + 1 + 8 + 10);
    }

    #[test]
    fn test_正向区域越界() {
        // length 声明 3 位, 但码字需要 5 位
        let (info, sections) = layout(1, &[(1, 1)]);
        let mut bw = BitWriter::new();
        bw.write_bits(0, 1);
        bw.write_bits(0, 8);
        bw.write_bits(3, 9);
        bw.write_bits(0b10001, 5);
        bw.write_bits(0, 8);
        let data = bw.finish();
        let err = RvlcDecoder::new()
            .decode(&mut BitReader::new(&data), 100, &info, &sections)
            .unwrap_err();
        // 前 3 位 "100" 未匹配, 扩展到 4 位时越过区域末尾 (位 21)
        assert!(matches!(
            err,
            MusiqueError::TruncatedStream { position: 21, requested: 1, available: 0 }
        ));
    }

    #[test]
    fn test_短窗_11位长度与跨组escape() {
        // grouping 0b1011000: 5 个窗口组, max_sfb = 2, section 长度字段 3 位
        let mut bw = BitWriter::new();
        bw.write_bits(0, 1);
        bw.write_bits(2, 2);
        bw.write_bits(0, 1);
        bw.write_bits(2, 4);
        bw.write_bits(0b1011000, 7);
        let per_group: [&[(u32, u32)]; 5] =
            [&[(1, 2)], &[(1, 1), (0, 1)], &[(0, 2)], &[(13, 2)], &[(1, 2)]];
        for group_sections in per_group {
            for &(cb, len) in group_sections {
                bw.write_bits(cb, 4);
                bw.write_bits(len, 3);
            }
        }
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let info = IcsInfo::parse(&mut br, &DecoderConfig::default()).unwrap();
        let sections = SectionData::parse(&mut br, &info, false).unwrap();

        let mut bw = BitWriter::new();
        bw.write_bits(0, 1);
        bw.write_bits(100, 8);
        bw.write_bits(24, 11); // 短窗 length 为 11 位
        bw.write_bits(0b111, 3); // 组 0: +1
        bw.write_bits(0b101, 3); // -1
        bw.write_bits(0b1100011, 7); // 组 1: +7 (escape 上)
        bw.write_bits(0b0, 1); // 组 3: 噪声基准 0
        bw.write_bits(0b1001, 4); // -2
        bw.write_bits(0b11011, 5); // 组 4: +2
        bw.write_bits(0b0, 1); // 0
        bw.write_bits(1, 1);
        bw.write_bits(5, 8);
        bw.write_bits(0, 1); // escape 幅度 16 + 2
        bw.write_bits(0b0010, 4);
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let (grid, side) = RvlcDecoder::new()
            .decode(&mut br, 100, &info, &sections)
            .unwrap();

        assert_eq!(side.length, 24);
        assert_eq!(side.escapes_length, Some(5));
        assert_eq!(br.bits_read(), 1 + 8 + 11 + 24 + 1 + 8 + 5);
        assert_eq!((grid.get(0, 0), grid.get(0, 1)), (101, 100));
        // 组 1 的 escape 偏移传递到组 4
        assert_eq!((grid.get(1, 0), grid.get(1, 1)), (125, 0));
        assert_eq!((grid.get(2, 0), grid.get(2, 1)), (0, 0));
        assert_eq!((grid.get(3, 0), grid.get(3, 1)), (0, -2));
        assert_eq!((grid.get(4, 0), grid.get(4, 1)), (127, 127));
    }
}
