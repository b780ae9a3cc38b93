//! musique-probe - AAC 码流探测工具
//!
//! 把 ADTS 文件逐帧送入解码核心, 输出每帧的声道与频谱统计.
//! 指定 `--config` 时输入被当作单个裸 raw_data_block.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use musique_codec::{AacCoreDecoder, ChannelSpectrum, DecodedFrame, DecoderConfig};

/// musique AAC 码流探测工具
#[derive(Parser, Debug)]
#[command(name = "musique-probe", version, about = "纯 Rust AAC 码流探测工具")]
struct Cli {
    /// 输入文件路径
    input: Option<PathBuf>,

    /// 解码参数 (JSON), 指定后输入按裸 raw_data_block 解码
    #[arg(long)]
    config: Option<PathBuf>,

    /// 显示每帧详情
    #[arg(long)]
    show_frames: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 静默模式 (只输出探测结果)
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================
// JSON 输出结构体
// ============================================================

/// 完整探测结果
#[derive(Serialize)]
struct ProbeOutput {
    filename: String,
    frames_decoded: usize,
    frames_dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<FrameInfo>>,
}

/// 帧信息
#[derive(Serialize)]
struct FrameInfo {
    offset: usize,
    bits: usize,
    channels: Vec<ChannelInfo>,
}

/// 声道信息
#[derive(Serialize)]
struct ChannelInfo {
    element: String,
    window_sequence: String,
    max_sfb: usize,
    global_gain: i32,
    nonzero_lines: usize,
    energy: f64,
}

fn channel_info(ch: &ChannelSpectrum) -> ChannelInfo {
    ChannelInfo {
        element: format!("{:?}", ch.element),
        window_sequence: format!("{:?}", ch.info.window_sequence),
        max_sfb: ch.info.max_sfb,
        global_gain: ch.global_gain,
        nonzero_lines: ch.quantized.iter().filter(|&&q| q != 0).count(),
        energy: ch.spectrum.iter().map(|&x| f64::from(x) * f64::from(x)).sum(),
    }
}

fn frame_info(offset: usize, frame: &DecodedFrame) -> FrameInfo {
    FrameInfo {
        offset,
        bits: frame.bits_consumed,
        channels: frame.channels.iter().map(channel_info).collect(),
    }
}

// ============================================================
// 主逻辑
// ============================================================

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let Some(input_path) = cli.input.as_deref() else {
        print_banner();
        return Ok(());
    };

    if !cli.quiet {
        eprintln!(
            "musique-probe 版本 {} -- 纯 Rust AAC 码流探测工具",
            env!("CARGO_PKG_VERSION")
        );
        eprintln!("输入文件: {}", input_path.display());
    }

    let data = fs::read(input_path)
        .with_context(|| format!("无法打开文件 '{}'", input_path.display()))?;

    let output = match &cli.config {
        Some(config_path) => probe_raw_block(input_path, config_path, &data)?,
        None => probe_adts(input_path, &data, cli.show_frames)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_output_text(&output);
    }
    Ok(())
}

fn probe_adts(input_path: &Path, data: &[u8], show_frames: bool) -> Result<ProbeOutput> {
    let mut frames = Vec::new();
    let stats = musique_codec::decode_adts_stream(data, |adts, decoded| {
        if show_frames {
            frames.push(frame_info(adts.offset, decoded));
        }
    })
    .context("ADTS 流解码失败")?;

    Ok(ProbeOutput {
        filename: input_path.display().to_string(),
        frames_decoded: stats.frames_decoded,
        frames_dropped: stats.frames_dropped,
        frames: show_frames.then_some(frames),
    })
}

fn probe_raw_block(input_path: &Path, config_path: &Path, data: &[u8]) -> Result<ProbeOutput> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("无法读取配置 '{}'", config_path.display()))?;
    let config: DecoderConfig = serde_json::from_str(&text)
        .with_context(|| format!("配置格式错误 '{}'", config_path.display()))?;
    let mut decoder = AacCoreDecoder::new(config).context("解码参数无效")?;

    let (decoded, dropped, frames) = match decoder.decode_frame(data) {
        Ok(frame) => (1, 0, vec![frame_info(0, frame)]),
        Err(e) => {
            log::warn!("raw_data_block 解码失败: {}", e);
            (0, 1, Vec::new())
        }
    };
    Ok(ProbeOutput {
        filename: input_path.display().to_string(),
        frames_decoded: decoded,
        frames_dropped: dropped,
        frames: Some(frames),
    })
}

// ============================================================
// 文本输出
// ============================================================

fn print_output_text(output: &ProbeOutput) {
    println!("[STREAM]");
    println!("  文件名       : {}", output.filename);
    println!("  解码帧数     : {}", output.frames_decoded);
    println!("  丢弃帧数     : {}", output.frames_dropped);
    println!("[/STREAM]");
    println!();

    for frame in output.frames.iter().flatten() {
        println!("[FRAME @{}]", frame.offset);
        println!("  位数         : {}", frame.bits);
        for (i, ch) in frame.channels.iter().enumerate() {
            println!(
                "  声道 #{i}      : {} {} max_sfb={} gain={} 非零={} 能量={:.3e}",
                ch.element,
                ch.window_sequence,
                ch.max_sfb,
                ch.global_gain,
                ch.nonzero_lines,
                ch.energy
            );
        }
        println!("[/FRAME]");
    }
}

/// 打印版本横幅
fn print_banner() {
    println!(
        "musique-probe 版本 {} -- 纯 Rust AAC 码流探测工具",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("用法: musique-probe [选项] <输入文件>");
    println!();
    println!("选项:");
    println!("  --config <文件>   解码参数 (JSON), 输入按裸 raw_data_block 解码");
    println!("  --show-frames     显示每帧详情");
    println!("  --json            以 JSON 格式输出");
    println!("  -q, --quiet       静默模式");
    println!();
    println!("使用 --help 查看完整用法.");
}
