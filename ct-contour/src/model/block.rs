use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

/// 按通道丢弃: 以概率 `prob` 把整张特征图置零, 其余通道按 `1 / (1 - prob)` 放大.
///
/// 仅在后端记录梯度 (训练) 时生效, 推理时为恒等映射.
#[derive(Module, Clone, Debug)]
pub struct ChannelDropout {
    prob: f64,
}

impl ChannelDropout {
    /// 创建丢弃层. `prob` 须位于 \[0, 1).
    pub fn new(prob: f64) -> Self {
        assert!((0.0..1.0).contains(&prob), "丢弃概率须位于 [0, 1)");
        Self { prob }
    }

    /// 丢弃概率.
    #[inline]
    pub fn prob(&self) -> f64 {
        self.prob
    }

    /// 输入形状 `[N, C, H, W]`.
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.prob == 0.0 {
            return x;
        }
        let [n, c, _, _] = x.dims();
        let keep = 1.0 - self.prob;
        let mask = Tensor::<B, 4>::random([n, c, 1, 1], Distribution::Bernoulli(keep), &x.device());
        x * mask.div_scalar(keep)
    }
}

/// 卷积 -> 批归一化 -> ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    /// `kernel x kernel` 卷积, 四周各填充 `padding`.
    pub fn new(
        [input, output]: [usize; 2],
        kernel: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([input, output], [kernel, kernel])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);
        let norm = BatchNormConfig::new(output).init(device);
        Self { conv, norm }
    }

    /// 前向传播.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(x)))
    }
}

/// 编码块: 3x3 卷积, 通道丢弃, 3x3 卷积, 1x1 卷积.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    first: ConvBlock<B>,
    dropout: ChannelDropout,
    second: ConvBlock<B>,
    pointwise: ConvBlock<B>,
}

impl<B: Backend> EncoderBlock<B> {
    /// 输入输出通道 `[input, output]`.
    pub fn new(channels: [usize; 2], dropout: f64, device: &B::Device) -> Self {
        let [_, output] = channels;
        Self {
            first: ConvBlock::new(channels, 3, 1, device),
            dropout: ChannelDropout::new(dropout),
            second: ConvBlock::new([output, output], 3, 1, device),
            pointwise: ConvBlock::new([output, output], 1, 0, device),
        }
    }

    /// 前向传播, 空间尺寸不变.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.first.forward(x);
        let x = self.dropout.forward(x);
        let x = self.second.forward(x);
        self.pointwise.forward(x)
    }
}

/// 解码块: 3x3 卷积, 通道丢弃, 3x3 卷积.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    first: ConvBlock<B>,
    dropout: ChannelDropout,
    second: ConvBlock<B>,
}

impl<B: Backend> DecoderBlock<B> {
    /// 输入输出通道 `[input, output]`. 输入是上采样结果与跳跃连接的拼接.
    pub fn new(channels: [usize; 2], dropout: f64, device: &B::Device) -> Self {
        let [_, output] = channels;
        Self {
            first: ConvBlock::new(channels, 3, 1, device),
            dropout: ChannelDropout::new(dropout),
            second: ConvBlock::new([output, output], 3, 1, device),
        }
    }

    /// 前向传播, 空间尺寸不变.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.first.forward(x);
        let x = self.dropout.forward(x);
        self.second.forward(x)
    }
}
