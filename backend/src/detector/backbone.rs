//! ResNet-50 feature extractor laid out with torchvision's variable names,
//! so `state_dict` tensors map one to one onto the var store.

use tch::nn;

const EXPANSION: i64 = 4;

/// Width of the pooled feature vector fed to the classifier head.
pub const FEATURE_DIM: i64 = 512 * EXPANSION;

fn conv2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, padding: i64, stride: i64) -> nn::Conv2D {
    let conv2d_cfg = nn::ConvConfig {
        stride,
        padding,
        bias: false,
        ..Default::default()
    };
    nn::conv2d(p, c_in, c_out, ksize, conv2d_cfg)
}

fn downsample(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> nn::SequentialT {
    if stride != 1 || c_in != c_out {
        nn::seq_t()
            .add(conv2d(&p / "0", c_in, c_out, 1, 0, stride))
            .add(nn::batch_norm2d(&p / "1", c_out, Default::default()))
    } else {
        nn::seq_t()
    }
}

// Stride sits on the 3x3 convolution, as in torchvision's ResNet v1.5.
fn bottleneck_block(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> nn::FuncT<'static> {
    let e_dim = c_out * EXPANSION;
    let conv1 = conv2d(&p / "conv1", c_in, c_out, 1, 0, 1);
    let bn1 = nn::batch_norm2d(&p / "bn1", c_out, Default::default());
    let conv2 = conv2d(&p / "conv2", c_out, c_out, 3, 1, stride);
    let bn2 = nn::batch_norm2d(&p / "bn2", c_out, Default::default());
    let conv3 = conv2d(&p / "conv3", c_out, e_dim, 1, 0, 1);
    let bn3 = nn::batch_norm2d(&p / "bn3", e_dim, Default::default());
    let downsample = downsample(&p / "downsample", c_in, e_dim, stride);
    nn::func_t(move |xs, train| {
        let ys = xs
            .apply(&conv1)
            .apply_t(&bn1, train)
            .relu()
            .apply(&conv2)
            .apply_t(&bn2, train)
            .relu()
            .apply(&conv3)
            .apply_t(&bn3, train);
        (xs.apply_t(&downsample, train) + ys).relu()
    })
}

fn bottleneck_layer(p: nn::Path, c_in: i64, c_out: i64, stride: i64, cnt: i64) -> nn::SequentialT {
    let mut layer = nn::seq_t().add(bottleneck_block(&p / "0", c_in, c_out, stride));
    for block_index in 1..cnt {
        layer = layer.add(bottleneck_block(&p / block_index, c_out * EXPANSION, c_out, 1));
    }
    layer
}

/// ResNet-50 without its final fully connected layer. Maps `[N, 3, H, W]`
/// images to `[N, FEATURE_DIM]` pooled features.
///
/// Flattening uses `flatten(1, -1)` rather than a view on the current batch
/// size, so a traced graph keeps the batch dimension dynamic.
pub fn resnet50_features(p: &nn::Path) -> nn::FuncT<'static> {
    let conv1 = conv2d(p / "conv1", 3, 64, 7, 3, 2);
    let bn1 = nn::batch_norm2d(p / "bn1", 64, Default::default());
    let layer1 = bottleneck_layer(p / "layer1", 64, 64, 1, 3);
    let layer2 = bottleneck_layer(p / "layer2", 64 * EXPANSION, 128, 2, 4);
    let layer3 = bottleneck_layer(p / "layer3", 128 * EXPANSION, 256, 2, 6);
    let layer4 = bottleneck_layer(p / "layer4", 256 * EXPANSION, 512, 2, 3);
    nn::func_t(move |xs, train| {
        xs.apply(&conv1)
            .apply_t(&bn1, train)
            .relu()
            .max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false)
            .apply_t(&layer1, train)
            .apply_t(&layer2, train)
            .apply_t(&layer3, train)
            .apply_t(&layer4, train)
            .adaptive_avg_pool2d([1, 1])
            .flatten(1, -1)
    })
}
