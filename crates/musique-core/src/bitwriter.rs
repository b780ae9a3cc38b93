//! 比特流写入器.
//!
//! 与 [`BitReader`](crate::bitreader::BitReader) 对应, 按大端位序写入.
//! 解码核心本身不写码流; 写入器用于拼装测试码流、基准输入以及探测工具的自检帧.

/// 比特流写入器
///
/// # 示例
/// ```
/// use musique_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_bits(0b0001, 4);
/// bw.write_bits(0b01010101, 8);
/// assert_eq!(bw.finish(), vec![0b10110001, 0b01010101]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入 1 个布尔位
    pub fn write_bool(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位高位在前写入
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    /// 写入连续 `count` 个 1 后跟一个 0 (AAC escape 前缀)
    pub fn write_ones_then_zero(&mut self, count: u32) {
        for _ in 0..count {
            self.write_bit(1);
        }
        self.write_bit(0);
    }

    /// 用 0 填充到字节边界
    pub fn align_to_byte(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(0);
        }
    }

    /// 结束写入, 不足一字节的部分低位补 0
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_write_then_read() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_bool(true);
        bw.write_bits(0xABCD, 16);
        bw.write_ones_then_zero(3);
        assert_eq!(bw.bits_written(), 24);

        let data = bw.finish();
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(3).unwrap(), 0b101);
        assert!(br.read_bool().unwrap());
        assert_eq!(br.read_bits(16).unwrap(), 0xABCD);
        assert_eq!(br.read_bits(4).unwrap(), 0b1110);
    }

    #[test]
    fn test_finish_pads_partial_byte() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b11, 2);
        assert_eq!(bw.finish(), vec![0b1100_0000]);
    }
}
