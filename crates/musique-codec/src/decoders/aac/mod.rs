//! AAC 码流解码核心.
//!
//! 输入一个 raw_data_block (一个访问单元), 输出每个声道反量化后的频谱.
//! 时域变换 (IMDCT/加窗) 不在本模块内; SSR 增益控制路径可通过
//! [`AacCoreDecoder::synthesize_gain_control`] 直接得到时域样本.
//!
//! # 解码流程
//! 1. 解析语法元素 (SCE/CPE/LFE, 跳过 DSE/FIL)
//! 2. section_data → scale factor (DPCM 或 RVLC)
//! 3. pulse/tns/gain_control 旁路数据
//! 4. Huffman 解码频谱 → 叠加脉冲 → 反量化 → PNS
//! 5. CPE: M/S 与强度立体声
//! 6. TNS 滤波

mod codebook_data;
pub mod config;
pub mod gain_control;
pub mod huffman;
pub mod ics;
pub mod iquant;
pub mod ps;
pub mod rvlc;
pub mod stereo;
pub mod tables;
pub mod tns;


use log::{debug, trace};
use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

pub use config::{AacProfile, DecoderConfig, FrameLength};
pub use gain_control::{BANDS, GainControlData, Ipqf};
pub use huffman::{AacCodebooks, CodebookShape, CodebookTable, codebook_shape};
pub use ics::{BandType, IcsInfo, ScaleFactorGrid, SectionData, WindowSequence};
pub use iquant::{InverseQuantizer, compute_gain, compute_inv_quant};
pub use ps::{PsDecoder, PsFrameInfo, PsHeader, PsParameter, PsParameterDecoder};
pub use rvlc::{RvlcDecoder, RvlcSideInfo};
pub use tns::TnsData;

use ics::{PulseData, decode_spectral_data, parse_scale_factors};
use stereo::{MsMask, NoiseGenerator, apply_intensity_stereo, apply_ms_stereo, apply_pns};

/// 语法元素类型 (id_syn_ele)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Sce,
    Cpe,
    Cce,
    Lfe,
    Dse,
    Pce,
    Fil,
    End,
}

impl ElementKind {
    fn from_id(id: u32) -> Self {
        match id & 7 {
            0 => Self::Sce,
            1 => Self::Cpe,
            2 => Self::Cce,
            3 => Self::Lfe,
            4 => Self::Dse,
            5 => Self::Pce,
            6 => Self::Fil,
            _ => Self::End,
        }
    }
}

/// 一个声道的解码结果
#[derive(Debug, Clone)]
pub struct ChannelSpectrum {
    pub element: ElementKind,
    pub element_tag: u8,
    pub global_gain: i32,
    pub info: IcsInfo,
    pub sections: SectionData,
    pub scale_factors: ScaleFactorGrid,
    /// 量化频谱 (已叠加脉冲)
    pub quantized: Vec<i32>,
    /// 反量化后的频谱, 布局 `window * window_len + line`
    pub spectrum: Vec<f32>,
    pub pulse: Option<PulseData>,
    pub tns: Option<TnsData>,
    pub gain_control: Option<GainControlData>,
    pub rvlc: Option<RvlcSideInfo>,
}

/// 一帧的解码结果
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub channels: Vec<ChannelSpectrum>,
    /// raw_data_block 消耗的位数
    pub bits_consumed: usize,
}

/// AAC 解码核心
///
/// 所有跨帧状态 (IPQF 延迟线, PNS 噪声源, 频谱缓冲区) 都归本实例所有.
pub struct AacCoreDecoder {
    config: DecoderConfig,
    codebooks: AacCodebooks,
    rvlc: RvlcDecoder,
    iquant: InverseQuantizer,
    noise: NoiseGenerator,
    ipqf: Vec<Ipqf>,
    frame: DecodedFrame,
    /// 回收的 (量化, 频谱) 缓冲区
    spare: Vec<(Vec<i32>, Vec<f32>)>,
}

impl AacCoreDecoder {
    /// 创建解码器
    pub fn new(config: DecoderConfig) -> MusiqueResult<Self> {
        config.validate()?;
        let channels = config.channel_count();
        debug!(
            "AAC 解码器: {:?}, {} Hz, {} 声道, 帧长 {}",
            config.profile,
            config.sample_rate(),
            channels,
            config.frame_length.samples()
        );
        Ok(Self {
            codebooks: AacCodebooks::build(),
            rvlc: RvlcDecoder::new(),
            iquant: InverseQuantizer::new(),
            noise: NoiseGenerator::new(),
            ipqf: vec![Ipqf::new(); channels],
            frame: DecodedFrame::default(),
            spare: Vec::new(),
            config,
        })
    }

    /// 当前配置
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// 更换配置并重置所有跨帧状态
    pub fn reconfigure(&mut self, config: DecoderConfig) -> MusiqueResult<()> {
        config.validate()?;
        self.ipqf = vec![Ipqf::new(); config.channel_count()];
        self.noise.reset();
        self.frame = DecodedFrame::default();
        self.spare.clear();
        self.config = config;
        Ok(())
    }

    /// 解码一个 raw_data_block
    ///
    /// 出错时不返回任何部分结果.
    pub fn decode_frame(&mut self, data: &[u8]) -> MusiqueResult<&DecodedFrame> {
        for ch in self.frame.channels.drain(..) {
            self.spare.push((ch.quantized, ch.spectrum));
        }
        self.frame.bits_consumed = 0;

        let mut br = BitReader::new(data);
        let mut channels = Vec::with_capacity(self.config.channel_count());

        while br.bits_left() >= 3 {
            let kind = ElementKind::from_id(br.read_bits(3)?);
            match kind {
                ElementKind::End => break,
                ElementKind::Sce | ElementKind::Lfe => {
                    let tag = br.read_bits(4)? as u8;
                    let mut ch = self.decode_ics(&mut br, kind, tag, None)?;
                    self.apply_tns(&mut ch);
                    channels.push(ch);
                }
                ElementKind::Cpe => {
                    let tag = br.read_bits(4)? as u8;
                    let (left, right) = self.decode_cpe(&mut br, tag)?;
                    channels.push(left);
                    channels.push(right);
                }
                ElementKind::Dse => skip_data_stream_element(&mut br)?,
                ElementKind::Fil => skip_fill_element(&mut br)?,
                ElementKind::Cce | ElementKind::Pce => {
                    return Err(MusiqueError::Unsupported(format!(
                        "AAC: 不支持语法元素 {:?}",
                        kind
                    )));
                }
            }
            if channels.len() > self.config.channel_count() {
                return Err(MusiqueError::InvalidData(format!(
                    "AAC: 帧内声道数超过配置 ({})",
                    self.config.channel_count()
                )));
            }
        }

        self.frame.channels = channels;
        self.frame.bits_consumed = br.bits_read();
        debug!(
            "AAC 帧: {} 声道, {} 位",
            self.frame.channels.len(),
            self.frame.bits_consumed
        );
        Ok(&self.frame)
    }

    /// 用声道的 IPQF 把 4 个子带合成为时域样本
    pub fn synthesize_gain_control(
        &mut self,
        channel: usize,
        bands: [&[f32]; BANDS],
        out: &mut [f32],
    ) -> MusiqueResult<()> {
        let frame_len = self.config.frame_length.samples();
        let ipqf = self.ipqf.get_mut(channel).ok_or_else(|| {
            MusiqueError::InvalidArgument(format!("AAC: 声道 {} 不存在", channel))
        })?;
        ipqf.process(bands, frame_len, out)
    }

    fn decode_cpe(
        &mut self,
        br: &mut BitReader,
        tag: u8,
    ) -> MusiqueResult<(ChannelSpectrum, ChannelSpectrum)> {
        let common_window = br.read_bool()?;
        let (mut left, mut right) = if common_window {
            let info = IcsInfo::parse(br, &self.config)?;
            let mask = MsMask::parse(br, &info)?;
            let mut left = self.decode_ics(br, ElementKind::Cpe, tag, Some(&info))?;
            let mut right = self.decode_ics(br, ElementKind::Cpe, tag, Some(&info))?;
            apply_ms_stereo(
                &mut left.spectrum,
                &mut right.spectrum,
                &info,
                &mask,
                &left.sections,
                &right.sections,
            );
            apply_intensity_stereo(
                &left.spectrum,
                &mut right.spectrum,
                &info,
                &right.sections,
                &right.scale_factors,
                &mask,
            );
            (left, right)
        } else {
            let left = self.decode_ics(br, ElementKind::Cpe, tag, None)?;
            let right = self.decode_ics(br, ElementKind::Cpe, tag, None)?;
            (left, right)
        };
        self.apply_tns(&mut left);
        self.apply_tns(&mut right);
        Ok((left, right))
    }

    /// 解析 individual_channel_stream 并完成反量化与 PNS
    fn decode_ics(
        &mut self,
        br: &mut BitReader,
        element: ElementKind,
        element_tag: u8,
        common_info: Option<&IcsInfo>,
    ) -> MusiqueResult<ChannelSpectrum> {
        let global_gain = br.read_bits(8)? as i32;
        let info = match common_info {
            Some(info) => info.clone(),
            None => IcsInfo::parse(br, &self.config)?,
        };
        let sections = SectionData::parse(br, &info, self.config.section_data_resilience)?;

        let (scale_factors, rvlc) = if self.config.scalefactor_data_resilience {
            let (grid, side) = self.rvlc.decode(br, global_gain, &info, &sections)?;
            (grid, Some(side))
        } else {
            let grid = parse_scale_factors(br, global_gain, &info, &sections, &self.codebooks)?;
            (grid, None)
        };

        let pulse = if br.read_bool()? {
            Some(PulseData::parse(br, &info)?)
        } else {
            None
        };
        let tns = if br.read_bool()? {
            Some(TnsData::parse(br, &info, &self.config)?)
        } else {
            None
        };
        let gain_control = if br.read_bool()? {
            if !self.config.gain_control() {
                return Err(MusiqueError::InvalidData(format!(
                    "AAC: {:?} 码流不能携带 gain_control_data",
                    self.config.profile
                )));
            }
            Some(GainControlData::parse(br, info.window_sequence)?)
        } else {
            None
        };

        trace!(
            "AAC ICS: {:?}, max_sfb={}, gain={}, pulse={}, tns={}, bits_left={}",
            info.window_sequence,
            info.max_sfb,
            global_gain,
            pulse.is_some(),
            tns.is_some(),
            br.bits_left()
        );

        let frame_len = info.frame_len();
        let (mut quantized, mut spectrum) = self.spare.pop().unwrap_or_default();
        quantized.resize(frame_len, 0);
        spectrum.resize(frame_len, 0.0);

        decode_spectral_data(br, &info, &sections, &self.codebooks, &mut quantized)?;
        if let Some(pulse) = &pulse {
            pulse.apply(&info, &mut quantized)?;
        }
        self.iquant
            .process(&info, &quantized, &scale_factors, &mut spectrum)?;
        apply_pns(
            &mut spectrum,
            &info,
            &sections,
            &scale_factors,
            &mut self.noise,
        );

        Ok(ChannelSpectrum {
            element,
            element_tag,
            global_gain,
            info,
            sections,
            scale_factors,
            quantized,
            spectrum,
            pulse,
            tns,
            gain_control,
            rvlc,
        })
    }

    fn apply_tns(&self, ch: &mut ChannelSpectrum) {
        if let Some(tns) = &ch.tns {
            tns.apply(&mut ch.spectrum, &ch.info, self.config.sample_rate_index);
        }
    }
}

/// 跳过 data_stream_element
fn skip_data_stream_element(br: &mut BitReader) -> MusiqueResult<()> {
    let _tag = br.read_bits(4)?;
    let align = br.read_bool()?;
    let mut count = br.read_bits(8)? as usize;
    if count == 255 {
        count += br.read_bits(8)? as usize;
    }
    if align {
        br.align_to_byte();
    }
    br.skip_bits(count * 8)
}

/// 跳过 fill_element
fn skip_fill_element(br: &mut BitReader) -> MusiqueResult<()> {
    let mut count = br.read_bits(4)? as usize;
    if count == 15 {
        count += br.read_bits(8)? as usize - 1;
    }
    br.skip_bits(count * 8)
}
