//! AAC 解码核心的旁路参数.
//!
//! 这些参数来自传输层 (ADTS 帧头) 或容器 (AudioSpecificConfig),
//! 不在 raw_data_block 中携带.

use serde::{Deserialize, Serialize};

use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::tables::AAC_SAMPLE_RATES;
use crate::adts::AdtsHeader;

/// 音频对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AacProfile {
    /// AAC Main
    Main,
    /// AAC Low Complexity
    Lc,
    /// AAC Scalable Sample Rate (增益控制)
    Ssr,
    /// AAC Long Term Prediction
    Ltp,
    /// ER AAC LC (错误恢复)
    ErLc,
}

impl AacProfile {
    /// 从 MPEG-4 audioObjectType 转换
    pub fn from_object_type(aot: u32) -> MusiqueResult<Self> {
        match aot {
            1 => Ok(Self::Main),
            2 => Ok(Self::Lc),
            3 => Ok(Self::Ssr),
            4 => Ok(Self::Ltp),
            17 => Ok(Self::ErLc),
            _ => Err(MusiqueError::Unsupported(format!(
                "AAC: 不支持 audioObjectType={}",
                aot
            ))),
        }
    }

    /// MPEG-4 audioObjectType
    pub fn object_type(self) -> u32 {
        match self {
            Self::Main => 1,
            Self::Lc => 2,
            Self::Ssr => 3,
            Self::Ltp => 4,
            Self::ErLc => 17,
        }
    }

    /// 是否为错误恢复 (ER) 对象类型
    pub fn is_error_resilient(self) -> bool {
        matches!(self, Self::ErLc)
    }
}

/// 每帧采样数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameLength {
    #[default]
    #[serde(rename = "1024")]
    Samples1024,
    #[serde(rename = "960")]
    Samples960,
}

impl FrameLength {
    /// 长窗口的频谱线数
    pub fn samples(self) -> usize {
        match self {
            Self::Samples1024 => 1024,
            Self::Samples960 => 960,
        }
    }

    /// 短窗口的频谱线数
    pub fn short_window_len(self) -> usize {
        self.samples() / 8
    }
}

/// 解码器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub profile: AacProfile,
    /// 采样率索引 (0-12)
    pub sample_rate_index: u8,
    /// 声道配置 (1-7)
    pub channel_config: u8,
    #[serde(default)]
    pub frame_length: FrameLength,
    /// section_data 使用 5 位码本且 escape 码本不带长度
    #[serde(default)]
    pub section_data_resilience: bool,
    /// scalefactor 使用 RVLC
    #[serde(default)]
    pub scalefactor_data_resilience: bool,
    /// 频谱数据重排 (HCR), 不支持
    #[serde(default)]
    pub spectral_data_resilience: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            profile: AacProfile::Lc,
            sample_rate_index: 4,
            channel_config: 2,
            frame_length: FrameLength::Samples1024,
            section_data_resilience: false,
            scalefactor_data_resilience: false,
            spectral_data_resilience: false,
        }
    }
}

impl DecoderConfig {
    /// 从 ADTS 帧头构建
    pub fn from_adts(header: &AdtsHeader) -> MusiqueResult<Self> {
        let config = Self {
            profile: AacProfile::from_object_type(u32::from(header.profile) + 1)?,
            sample_rate_index: header.sample_rate_index,
            channel_config: header.channel_config,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// 解析 MPEG-4 AudioSpecificConfig (ISO 14496-3, 1.6.2.1 / GASpecificConfig 4.4.1)
    pub fn from_audio_specific_config(data: &[u8]) -> MusiqueResult<Self> {
        let mut br = BitReader::new(data);
        let mut aot = br.read_bits(5)?;
        if aot == 31 {
            aot = 32 + br.read_bits(6)?;
        }
        let profile = AacProfile::from_object_type(aot)?;

        let mut sample_rate_index = br.read_bits(4)? as u8;
        if sample_rate_index == 0x0F {
            let rate = br.read_bits(24)?;
            sample_rate_index = AAC_SAMPLE_RATES
                .iter()
                .position(|&r| r == rate)
                .ok_or_else(|| {
                    MusiqueError::Unsupported(format!("AAC: 非标准采样率 {} Hz", rate))
                })? as u8;
        }
        let channel_config = br.read_bits(4)? as u8;
        if channel_config == 0 {
            return Err(MusiqueError::Unsupported(
                "AAC: channelConfiguration=0 需要 program_config_element".into(),
            ));
        }

        // GASpecificConfig
        let frame_length = if br.read_bool()? {
            FrameLength::Samples960
        } else {
            FrameLength::Samples1024
        };
        if br.read_bool()? {
            let _core_coder_delay = br.read_bits(14)?;
        }
        let extension_flag = br.read_bool()?;

        let mut config = Self {
            profile,
            sample_rate_index,
            channel_config,
            frame_length,
            ..Self::default()
        };
        if extension_flag && profile.is_error_resilient() {
            config.section_data_resilience = br.read_bool()?;
            config.scalefactor_data_resilience = br.read_bool()?;
            config.spectral_data_resilience = br.read_bool()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// 检查参数组合
    pub fn validate(&self) -> MusiqueResult<()> {
        if self.sample_rate_index as usize >= AAC_SAMPLE_RATES.len() {
            return Err(MusiqueError::InvalidArgument(format!(
                "AAC: 保留的采样率索引 {}",
                self.sample_rate_index
            )));
        }
        if !(1..=7).contains(&self.channel_config) {
            return Err(MusiqueError::InvalidArgument(format!(
                "AAC: 无效的声道配置 {}",
                self.channel_config
            )));
        }
        if self.spectral_data_resilience {
            return Err(MusiqueError::Unsupported(
                "AAC: 不支持频谱数据重排 (HCR)".into(),
            ));
        }
        let resilience = self.section_data_resilience || self.scalefactor_data_resilience;
        if resilience && !self.profile.is_error_resilient() {
            return Err(MusiqueError::InvalidArgument(format!(
                "AAC: {:?} 不能使用错误恢复工具",
                self.profile
            )));
        }
        Ok(())
    }

    /// 采样率 (Hz)
    pub fn sample_rate(&self) -> u32 {
        AAC_SAMPLE_RATES
            .get(self.sample_rate_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// 输出声道数
    pub fn channel_count(&self) -> usize {
        match self.channel_config {
            7 => 8,
            n => n as usize,
        }
    }

    /// 是否启用增益控制 (SSR)
    pub fn gain_control(&self) -> bool {
        self.profile == AacProfile::Ssr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_lc() {
        // AOT=2, freq_idx=4 (44100), chan=2: 00010 0100 0010 000
        let config = DecoderConfig::from_audio_specific_config(&[0x12, 0x10]).unwrap();
        assert_eq!(config.profile, AacProfile::Lc);
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.channel_count(), 2);
        assert_eq!(config.frame_length, FrameLength::Samples1024);
        assert!(!config.gain_control());
    }

    #[test]
    fn test_audio_specific_config_er_lc_rvlc() {
        // AOT=17, freq_idx=3, chan=1, frameLength=1 (960), dependsOnCore=0, ext=1,
        // section=1, scalefactor=1, spectral=0
        // 10001 0011 0001 1 0 1 1 1 0 → 1000 1001 1000 1101 1100 0000
        let config = DecoderConfig::from_audio_specific_config(&[0x89, 0x8D, 0xC0]).unwrap();
        assert_eq!(config.profile, AacProfile::ErLc);
        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.frame_length, FrameLength::Samples960);
        assert!(config.section_data_resilience);
        assert!(config.scalefactor_data_resilience);
        assert!(!config.spectral_data_resilience);
    }

    #[test]
    fn test_不支持的对象类型() {
        // AOT=5 (SBR)
        let err = DecoderConfig::from_audio_specific_config(&[0x2A, 0x10]).unwrap_err();
        assert!(matches!(err, MusiqueError::Unsupported(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = DecoderConfig::default();
        assert!(config.validate().is_ok());
        config.sample_rate_index = 13;
        assert!(matches!(config.validate(), Err(MusiqueError::InvalidArgument(_))));
        config.sample_rate_index = 4;
        config.channel_config = 0;
        assert!(config.validate().is_err());
        config.channel_config = 2;
        config.scalefactor_data_resilience = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_配置() {
        let json = r#"{"profile":"ssr","sample_rate_index":3,"channel_config":1,"frame_length":"960"}"#;
        let config: DecoderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.profile, AacProfile::Ssr);
        assert_eq!(config.frame_length, FrameLength::Samples960);
        assert!(config.gain_control());
        assert!(!config.scalefactor_data_resilience);
    }
}
