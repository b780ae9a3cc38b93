//! individual_channel_stream 语法解析: ics_info, section_data, scale_factor_data,
//! pulse_data 与 spectral_data (ISO 14496-3, 4.4.2.7).

use std::ops::Range;

use log::trace;
use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::config::DecoderConfig;
use super::huffman::{AacCodebooks, is_spectral_codebook};
use super::tables::{
    self, ESC_HCB, INTENSITY_HCB, INTENSITY_HCB2, MAX_SWB, MAX_WINDOW_GROUPS, NOISE_HCB,
    NOISE_OFFSET, NOISE_PRE, NOISE_PRE_BITS, ZERO_HCB,
};

/// 窗口序列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSequence {
    OnlyLong,
    LongStart,
    EightShort,
    LongStop,
}

impl WindowSequence {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::OnlyLong,
            1 => Self::LongStart,
            2 => Self::EightShort,
            _ => Self::LongStop,
        }
    }

    /// 码流中的 2 位编码
    pub fn index(self) -> usize {
        match self {
            Self::OnlyLong => 0,
            Self::LongStart => 1,
            Self::EightShort => 2,
            Self::LongStop => 3,
        }
    }
}

/// ics_info 与由其推导出的窗口/频带布局
#[derive(Debug, Clone)]
pub struct IcsInfo {
    pub window_sequence: WindowSequence,
    pub window_shape: u8,
    pub max_sfb: usize,
    /// 当前窗口长度下的 band 总数
    pub num_swb: usize,
    pub num_windows: usize,
    pub num_window_groups: usize,
    pub window_group_lengths: [usize; MAX_WINDOW_GROUPS],
    pub window_group_starts: [usize; MAX_WINDOW_GROUPS],
    /// 每个窗口的频谱线数
    pub window_len: usize,
    pub swb_offsets: &'static [usize],
}

impl IcsInfo {
    /// 解析 ics_info
    pub fn parse(br: &mut BitReader, config: &DecoderConfig) -> MusiqueResult<Self> {
        let _reserved = br.read_bit()?;
        let window_sequence = WindowSequence::from_bits(br.read_bits(2)?);
        let window_shape = br.read_bits(1)? as u8;
        let is_short = window_sequence == WindowSequence::EightShort;

        let mut info = Self {
            window_sequence,
            window_shape,
            max_sfb: 0,
            num_swb: 0,
            num_windows: 1,
            num_window_groups: 1,
            window_group_lengths: [0; MAX_WINDOW_GROUPS],
            window_group_starts: [0; MAX_WINDOW_GROUPS],
            window_len: config.frame_length.samples(),
            swb_offsets: tables::swb_offsets(config.sample_rate_index, config.frame_length, is_short)?,
        };
        info.window_group_lengths[0] = 1;

        if is_short {
            info.max_sfb = br.read_bits(4)? as usize;
            let grouping = br.read_bits(7)?;
            info.num_windows = 8;
            info.window_len = config.frame_length.short_window_len();
            for i in 0..7 {
                if grouping & (1 << (6 - i)) != 0 {
                    info.window_group_lengths[info.num_window_groups - 1] += 1;
                } else {
                    info.window_group_starts[info.num_window_groups] = i + 1;
                    info.window_group_lengths[info.num_window_groups] = 1;
                    info.num_window_groups += 1;
                }
            }
        } else {
            info.max_sfb = br.read_bits(6)? as usize;
            if br.read_bool()? {
                return Err(MusiqueError::Unsupported(
                    "AAC: 不支持 predictor_data (Main/LTP 预测)".into(),
                ));
            }
        }

        info.num_swb = info.swb_offsets.len() - 1;
        if info.max_sfb > info.num_swb {
            return Err(MusiqueError::InvalidData(format!(
                "AAC ics_info: max_sfb={} 超过 band 数 {}",
                info.max_sfb, info.num_swb
            )));
        }
        Ok(info)
    }

    /// 是否为 8 个短窗
    pub fn is_eight_short(&self) -> bool {
        self.window_sequence == WindowSequence::EightShort
    }

    /// band 在窗口内的频谱线范围
    pub fn band_range(&self, sfb: usize) -> Range<usize> {
        self.swb_offsets[sfb]..self.swb_offsets[sfb + 1]
    }

    /// 窗口组包含的窗口
    pub fn group_windows(&self, group: usize) -> Range<usize> {
        let start = self.window_group_starts[group];
        start..start + self.window_group_lengths[group]
    }

    /// 整帧频谱线数
    pub fn frame_len(&self) -> usize {
        self.num_windows * self.window_len
    }
}

// ============================================================
// section_data
// ============================================================

/// band 的码本类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandType {
    #[default]
    Zero,
    /// 频谱码本 1-11 或虚拟码本 16-31
    Spectral(u8),
    Noise,
    /// 强度立体声, `in_phase` 为 false 时对应 INTENSITY_HCB2
    Intensity { in_phase: bool },
}

impl BandType {
    /// 从 section 码本号转换
    pub fn from_codebook(cb: u8) -> MusiqueResult<Self> {
        match cb {
            ZERO_HCB => Ok(Self::Zero),
            NOISE_HCB => Ok(Self::Noise),
            INTENSITY_HCB2 => Ok(Self::Intensity { in_phase: false }),
            INTENSITY_HCB => Ok(Self::Intensity { in_phase: true }),
            cb if is_spectral_codebook(cb) => Ok(Self::Spectral(cb)),
            _ => Err(MusiqueError::UnsupportedCodebook(cb)),
        }
    }
}

/// 一个 section: 组内连续且码本相同的 band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub group: usize,
    pub band_type: BandType,
    pub start: usize,
    pub end: usize,
}

/// section_data 及其展开后的 (窗口组, band) 码本表
#[derive(Debug, Clone, Default)]
pub struct SectionData {
    pub sections: Vec<Section>,
    num_window_groups: usize,
    max_sfb: usize,
    band_types: Vec<BandType>,
}

impl SectionData {
    /// 解析 section_data
    pub fn parse(br: &mut BitReader, info: &IcsInfo, resilience: bool) -> MusiqueResult<Self> {
        let is_short = info.is_eight_short();
        let sect_bits = if is_short { 3 } else { 5 };
        let sect_esc = (1usize << sect_bits) - 1;
        let cb_bits = if resilience { 5 } else { 4 };

        let mut data = Self {
            sections: Vec::new(),
            num_window_groups: info.num_window_groups,
            max_sfb: info.max_sfb,
            band_types: vec![BandType::Zero; info.num_window_groups * info.max_sfb],
        };

        for group in 0..info.num_window_groups {
            let mut k = 0usize;
            while k < info.max_sfb {
                let cb = br.read_bits(cb_bits)? as u8;
                let band_type = BandType::from_codebook(cb)?;

                let mut sect_len = 0usize;
                if resilience && (cb == ESC_HCB || cb >= 16) {
                    sect_len = 1;
                } else {
                    loop {
                        let incr = br.read_bits(sect_bits)? as usize;
                        sect_len += incr;
                        if incr != sect_esc {
                            break;
                        }
                    }
                }

                let end = k + sect_len;
                if sect_len == 0 || end > info.max_sfb {
                    return Err(MusiqueError::InvalidData(format!(
                        "AAC section_data 非法: group={}, sfb={}, 长度={}, max_sfb={}",
                        group, k, sect_len, info.max_sfb
                    )));
                }
                for sfb in k..end {
                    data.band_types[group * info.max_sfb + sfb] = band_type;
                }
                data.sections.push(Section {
                    group,
                    band_type,
                    start: k,
                    end,
                });
                k = end;
            }
        }
        Ok(data)
    }

    /// (窗口组, band) 的码本类别
    pub fn band_type(&self, group: usize, sfb: usize) -> BandType {
        if group >= self.num_window_groups || sfb >= self.max_sfb {
            return BandType::Zero;
        }
        self.band_types[group * self.max_sfb + sfb]
    }

    pub fn max_sfb(&self) -> usize {
        self.max_sfb
    }

    pub fn num_window_groups(&self) -> usize {
        self.num_window_groups
    }
}

// ============================================================
// scale factor
// ============================================================

/// (窗口组, band) → scale factor
///
/// 普通 band 存放 scale factor, 强度立体声 band 存放 IS position,
/// 噪声 band 存放噪声能量.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleFactorGrid {
    num_groups: usize,
    num_bands: usize,
    values: Vec<i32>,
}

impl ScaleFactorGrid {
    /// 创建全零表
    pub fn new(num_groups: usize, num_bands: usize) -> MusiqueResult<Self> {
        if num_groups > MAX_WINDOW_GROUPS || num_bands > MAX_SWB {
            return Err(MusiqueError::InvalidArgument(format!(
                "scale factor 表尺寸越界: groups={}, bands={}",
                num_groups, num_bands
            )));
        }
        Ok(Self {
            num_groups,
            num_bands,
            values: vec![0; num_groups * num_bands],
        })
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn get(&self, group: usize, sfb: usize) -> i32 {
        self.values[group * self.num_bands + sfb]
    }

    pub fn set(&mut self, group: usize, sfb: usize, value: i32) {
        self.values[group * self.num_bands + sfb] = value;
    }

    /// 对 (group, sfb) 之后的所有 band 中满足条件的项加上 delta
    pub(crate) fn shift_from(
        &mut self,
        group: usize,
        sfb: usize,
        delta: i32,
        mut filter: impl FnMut(usize, usize) -> bool,
    ) {
        for g in group..self.num_groups {
            let first = if g == group { sfb } else { 0 };
            for b in first..self.num_bands {
                if filter(g, b) {
                    self.values[g * self.num_bands + b] += delta;
                }
            }
        }
    }
}

/// 解析 scale_factor_data (ISO 14496-3, 4.6.2.3.2)
///
/// - 普通码本: global_gain 起始的 DPCM
/// - 强度立体声: 从 0 起始的 IS position DPCM
/// - 噪声: 第一个 band 读 9 位 PCM, 之后 DPCM
///
/// 解析阶段不做范围限制, 越界值由反量化处理为静音.
pub fn parse_scale_factors(
    br: &mut BitReader,
    global_gain: i32,
    info: &IcsInfo,
    sections: &SectionData,
    codebooks: &AacCodebooks,
) -> MusiqueResult<ScaleFactorGrid> {
    let mut grid = ScaleFactorGrid::new(info.num_window_groups, info.max_sfb)?;
    let mut sf = global_gain;
    let mut is_position = 0i32;
    let mut noise_energy = global_gain - NOISE_OFFSET;
    let mut noise_pcm = true;

    for group in 0..info.num_window_groups {
        for sfb in 0..info.max_sfb {
            let value = match sections.band_type(group, sfb) {
                BandType::Zero => 0,
                BandType::Intensity { .. } => {
                    is_position += codebooks.decode_scale_factor(br)? - 60;
                    is_position
                }
                BandType::Noise => {
                    if noise_pcm {
                        noise_pcm = false;
                        noise_energy += br.read_bits(NOISE_PRE_BITS)? as i32 - NOISE_PRE;
                    } else {
                        noise_energy += codebooks.decode_scale_factor(br)? - 60;
                    }
                    noise_energy
                }
                BandType::Spectral(_) => {
                    sf += codebooks.decode_scale_factor(br)? - 60;
                    sf
                }
            };
            grid.set(group, sfb, value);
        }
    }
    trace!(
        "AAC scale factors: groups={}, max_sfb={}, 最终 sf={}",
        info.num_window_groups, info.max_sfb, sf
    );
    Ok(grid)
}

// ============================================================
// pulse_data
// ============================================================

/// pulse_data: 在量化频谱上叠加最多 4 个脉冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseData {
    pub start_sfb: usize,
    pub offsets: Vec<usize>,
    pub amps: Vec<i32>,
}

impl PulseData {
    /// 解析 pulse_data, 仅允许长窗
    pub fn parse(br: &mut BitReader, info: &IcsInfo) -> MusiqueResult<Self> {
        if info.is_eight_short() {
            return Err(MusiqueError::InvalidData(
                "AAC pulse_data: 短窗不允许使用脉冲".into(),
            ));
        }
        let count = br.read_bits(2)? as usize + 1;
        let start_sfb = br.read_bits(6)? as usize;
        if start_sfb >= info.num_swb {
            return Err(MusiqueError::InvalidData(format!(
                "AAC pulse_data: start_sfb={} 超过 band 数 {}",
                start_sfb, info.num_swb
            )));
        }
        let mut offsets = Vec::with_capacity(count);
        let mut amps = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(br.read_bits(5)? as usize);
            amps.push(br.read_bits(4)? as i32);
        }
        Ok(Self {
            start_sfb,
            offsets,
            amps,
        })
    }

    /// 将脉冲叠加到量化频谱上 (幅度方向与原值符号一致)
    pub fn apply(&self, info: &IcsInfo, quantized: &mut [i32]) -> MusiqueResult<()> {
        let mut k = info.swb_offsets[self.start_sfb];
        for (&offset, &amp) in self.offsets.iter().zip(&self.amps) {
            k += offset;
            let line = quantized.get_mut(k).filter(|_| k < info.window_len).ok_or_else(|| {
                MusiqueError::InvalidData(format!("AAC pulse_data: 位置 {} 越界", k))
            })?;
            if *line > 0 {
                *line += amp;
            } else {
                *line -= amp;
            }
        }
        Ok(())
    }
}

// ============================================================
// spectral_data
// ============================================================

/// 解码 spectral_data 到量化频谱
///
/// 布局为窗口优先: `window * window_len + line`. 组内每个 band 按窗口逐个解码.
/// 零/噪声/强度立体声 band 不占码流, 对应系数保持为 0.
pub fn decode_spectral_data(
    br: &mut BitReader,
    info: &IcsInfo,
    sections: &SectionData,
    codebooks: &AacCodebooks,
    quantized: &mut [i32],
) -> MusiqueResult<()> {
    if quantized.len() < info.frame_len() {
        return Err(MusiqueError::InvalidArgument(format!(
            "频谱缓冲区长度 {} 小于帧长 {}",
            quantized.len(),
            info.frame_len()
        )));
    }
    quantized.iter_mut().for_each(|q| *q = 0);

    for section in &sections.sections {
        let BandType::Spectral(cb) = section.band_type else {
            continue;
        };
        for sfb in section.start..section.end {
            let band = info.band_range(sfb);
            for win in info.group_windows(section.group) {
                let base = win * info.window_len;
                let mut line = band.start;
                while line < band.end {
                    let tuple = codebooks.decode_spectral(cb, br)?;
                    let values = tuple.as_slice();
                    let count = values.len().min(band.end - line);
                    quantized[base + line..base + line + count].copy_from_slice(&values[..count]);
                    line += values.len();
                }
            }
        }
    }
    Ok(())
}
