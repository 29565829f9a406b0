//! 二维 U-Net 分割模型.
//!
//! 编码器逐级加倍通道并 2x2 最大池化, 解码器以转置卷积上采样,
//! 与同尺度的编码特征拼接后再卷积. 输出为未经 sigmoid 的 logits.

mod block;

pub use block::{ChannelDropout, ConvBlock, DecoderBlock, EncoderBlock};

use crate::consts::DEFAULT_ENCODER_CHANNELS;
use crate::error::Error;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// U-Net 结构参数.
#[derive(Config, Debug, PartialEq)]
pub struct UNetConfig {
    /// 各级编码器的输出通道数.
    #[config(default = "DEFAULT_ENCODER_CHANNELS.to_vec()")]
    pub encoder_channels: Vec<usize>,

    /// 输入通道数.
    #[config(default = 1)]
    pub input_channels: usize,

    /// 输出通道数.
    #[config(default = 1)]
    pub output_channels: usize,

    /// 编码块的通道丢弃概率.
    #[config(default = 0.2)]
    pub encoder_dropout: f64,

    /// 解码块的通道丢弃概率.
    #[config(default = 0.4)]
    pub decoder_dropout: f64,
}

/// 编码器的 `[输入, 输出]` 通道: `(input, c0), (c0, c1), ...`.
pub fn encoder_args(input_channels: usize, channels: &[usize]) -> Vec<[usize; 2]> {
    std::iter::once(input_channels)
        .chain(channels.iter().copied())
        .zip(channels.iter().copied())
        .map(|(i, o)| [i, o])
        .collect()
}

/// 解码器 (以及对应转置卷积) 的 `[输入, 输出]` 通道: 逆序通道的相邻两项.
pub fn decoder_args(channels: &[usize]) -> Vec<[usize; 2]> {
    channels
        .iter()
        .rev()
        .zip(channels.iter().rev().skip(1))
        .map(|(i, o)| [*i, *o])
        .collect()
}

impl UNetConfig {
    /// 输入高与宽必须是该值的倍数: `2^(编码级数 - 1)`.
    #[inline]
    pub fn required_divisor(&self) -> usize {
        1 << self.encoder_channels.len().saturating_sub(1)
    }

    /// 检查参数, 然后在 `device` 上初始化模型.
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<UNet<B>> {
        if self.encoder_channels.len() < 2 {
            return Err(Error::InvalidModel(format!(
                "至少需要 2 级编码器, 实际为 {}",
                self.encoder_channels.len()
            )));
        }
        if self.encoder_channels.contains(&0) || self.input_channels == 0 || self.output_channels == 0 {
            return Err(Error::InvalidModel("通道数不能为 0".to_string()));
        }
        for p in [self.encoder_dropout, self.decoder_dropout] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::InvalidModel(format!("丢弃概率 {p} 不在 [0, 1) 内")));
            }
        }

        let encoders = encoder_args(self.input_channels, &self.encoder_channels)
            .into_iter()
            .map(|c| EncoderBlock::new(c, self.encoder_dropout, device))
            .collect();
        let decoder_args = decoder_args(&self.encoder_channels);
        let transposers = decoder_args
            .iter()
            .map(|c| {
                ConvTranspose2dConfig::new(*c, [2, 2])
                    .with_stride([2, 2])
                    .init(device)
            })
            .collect();
        let decoders = decoder_args
            .iter()
            .map(|c| DecoderBlock::new(*c, self.decoder_dropout, device))
            .collect();
        let last = decoder_args.last().map(|[_, o]| *o).unwrap_or(self.encoder_channels[0]);
        let output = Conv2dConfig::new([last, self.output_channels], [1, 1]).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Ok(UNet {
            encoders,
            transposers,
            decoders,
            output,
            pool,
        })
    }
}

/// U-Net 模型.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoders: Vec<EncoderBlock<B>>,
    transposers: Vec<ConvTranspose2d<B>>,
    decoders: Vec<DecoderBlock<B>>,
    output: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> UNet<B> {
    /// 前向传播. 输入 `[N, C_in, H, W]`, 输出 logits `[N, C_out, H, W]`.
    ///
    /// `H` 与 `W` 须是 [`UNetConfig::required_divisor`] 的倍数, 否则拼接时 panic.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.decoders.len());
        let mut x = x;
        for encoder in self.encoders.iter() {
            x = encoder.forward(x);
            if skips.len() < self.decoders.len() {
                skips.push(x.clone());
                x = self.pool.forward(x);
            }
        }

        for ((decoder, transposer), skip) in self
            .decoders
            .iter()
            .zip(self.transposers.iter())
            .zip(skips.into_iter().rev())
        {
            let up = transposer.forward(x);
            x = decoder.forward(Tensor::cat(vec![up, skip], 1));
        }
        self.output.forward(x)
    }

    /// 编码级数.
    #[inline]
    pub fn depth(&self) -> usize {
        self.encoders.len()
    }
}
