// Numerical gradient checks for every layer, loss and model.
// Each analytic backward pass is compared with centered finite differences in f64.

use backprop_layers::config::{NetConfig, Normalization};
use backprop_layers::layers::*;
use backprop_layers::loss::{softmax_loss, svm_loss};
use backprop_layers::utils::{
    eval_numerical_gradient, eval_numerical_gradient_array, model_numerical_gradient, randn,
    rel_error, seeded_rng,
};
use backprop_layers::{FullyConnectedNet, Model, TwoLayerNet};
use ndarray::{Array1, Array2, Array4, ArrayD};
use rand::rngs::StdRng;

const H: f64 = 1e-5;
const LAYER_TOL: f64 = 1e-6;
const MODEL_TOL: f64 = 1e-5;

fn rng() -> StdRng {
    seeded_rng(Some(231))
}

fn check(name: &str, analytic: &ArrayD<f64>, numeric: &ArrayD<f64>, tol: f64) {
    let err = rel_error(analytic, numeric);
    assert!(err < tol, "{} relative error {:e} exceeds {:e}", name, err, tol);
}

// ============================================================================
// Primitive Layers
// ============================================================================

#[test]
fn test_affine_gradients() {
    let mut rng = rng();
    let x: ArrayD<f64> = randn((10, 2, 3), 1.0, &mut rng).into_dyn();
    let w: Array2<f64> = randn((6, 5), 1.0, &mut rng);
    let b: Array1<f64> = randn(5, 1.0, &mut rng);
    let dout: Array2<f64> = randn((10, 5), 1.0, &mut rng);

    let (_, cache) = affine_forward(&x, w.view(), b.view()).unwrap();
    let (dx, dw, db) = affine_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| affine_forward(x, w.view(), b.view()).map(|(out, _)| out),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dw_num = eval_numerical_gradient_array(
        |w| affine_forward(&x, w.view(), b.view()).map(|(out, _)| out),
        &w,
        &dout,
        H,
    )
    .unwrap();
    let db_num = eval_numerical_gradient_array(
        |b| affine_forward(&x, w.view(), b.view()).map(|(out, _)| out),
        &b,
        &dout,
        H,
    )
    .unwrap();

    assert_eq!(dx.shape(), &[10, 2, 3]);
    check("dx", &dx, &dx_num, LAYER_TOL);
    check("dw", &dw.into_dyn(), &dw_num.into_dyn(), LAYER_TOL);
    check("db", &db.into_dyn(), &db_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_relu_gradients() {
    let mut rng = rng();
    let x: Array2<f64> = randn((10, 10), 1.0, &mut rng);
    let dout: Array2<f64> = randn((10, 10), 1.0, &mut rng);

    let (_, cache) = relu_forward(&x);
    let dx = relu_backward(&dout, cache).unwrap();
    let dx_num =
        eval_numerical_gradient_array(|x| Ok(relu_forward(x).0), &x, &dout, H).unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_dropout_gradients_with_fixed_seed() {
    let mut rng = rng();
    let x: Array2<f64> = randn::<f64, _, _, _>((10, 10), 1.0, &mut rng).mapv(|v| v + 10.0);
    let dout: Array2<f64> = randn((10, 10), 1.0, &mut rng);
    let param = DropoutParam::new(0.2, Some(123)).unwrap();

    let (_, cache) = dropout_forward(&x, &param, Mode::Train);
    let dx = dropout_backward(&dout, cache).unwrap();
    let dx_num = eval_numerical_gradient_array(
        |x| Ok(dropout_forward(x, &param, Mode::Train).0),
        &x,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
}

// ============================================================================
// Normalization Layers
// ============================================================================

#[test]
fn test_batchnorm_gradients() {
    let mut rng = rng();
    let (n, d) = (4, 5);
    let x: Array2<f64> = randn::<f64, _, _, _>((n, d), 5.0, &mut rng).mapv(|v| v + 12.0);
    let gamma: Array1<f64> = randn(d, 1.0, &mut rng);
    let beta: Array1<f64> = randn(d, 1.0, &mut rng);
    let dout: Array2<f64> = randn((n, d), 1.0, &mut rng);
    let mut param = BatchNormParam::with_defaults(d);

    let (_, cache) =
        batchnorm_forward(&x, gamma.view(), beta.view(), &mut param, Mode::Train).unwrap();
    let (dx, dgamma, dbeta) = batchnorm_backward(&dout, cache.clone()).unwrap();
    let (dx_alt, _, _) = batchnorm_backward_alt(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| batchnorm_forward(x, gamma.view(), beta.view(), &mut param, Mode::Train).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dgamma_num = eval_numerical_gradient_array(
        |g| batchnorm_forward(&x, g.view(), beta.view(), &mut param, Mode::Train).map(|r| r.0),
        &gamma,
        &dout,
        H,
    )
    .unwrap();
    let dbeta_num = eval_numerical_gradient_array(
        |b| batchnorm_forward(&x, gamma.view(), b.view(), &mut param, Mode::Train).map(|r| r.0),
        &beta,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.clone().into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dx alt", &dx.into_dyn(), &dx_alt.into_dyn(), 1e-10);
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
    check("dbeta", &dbeta.into_dyn(), &dbeta_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_layernorm_gradients() {
    let mut rng = rng();
    let (n, d) = (4, 5);
    let x: Array2<f64> = randn::<f64, _, _, _>((n, d), 5.0, &mut rng).mapv(|v| v + 12.0);
    let gamma: Array1<f64> = randn(d, 1.0, &mut rng);
    let beta: Array1<f64> = randn(d, 1.0, &mut rng);
    let dout: Array2<f64> = randn((n, d), 1.0, &mut rng);
    let param = LayerNormParam::default();

    let (_, cache) = layernorm_forward(&x, gamma.view(), beta.view(), &param).unwrap();
    let (dx, dgamma, dbeta) = layernorm_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| layernorm_forward(x, gamma.view(), beta.view(), &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dgamma_num = eval_numerical_gradient_array(
        |g| layernorm_forward(&x, g.view(), beta.view(), &param).map(|r| r.0),
        &gamma,
        &dout,
        H,
    )
    .unwrap();
    let dbeta_num = eval_numerical_gradient_array(
        |b| layernorm_forward(&x, gamma.view(), b.view(), &param).map(|r| r.0),
        &beta,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
    check("dbeta", &dbeta.into_dyn(), &dbeta_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_groupnorm_gradients() {
    let mut rng = rng();
    let x: Array2<f64> = randn::<f64, _, _, _>((3, 8), 3.0, &mut rng).mapv(|v| v - 4.0);
    let gamma: Array1<f64> = randn(8, 1.0, &mut rng);
    let beta: Array1<f64> = randn(8, 1.0, &mut rng);
    let dout: Array2<f64> = randn((3, 8), 1.0, &mut rng);
    let param = GroupNormParam::new(2, 1e-5).unwrap();

    let (_, cache) = groupnorm_forward(&x, gamma.view(), beta.view(), &param).unwrap();
    let (dx, dgamma, _) = groupnorm_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| groupnorm_forward(x, gamma.view(), beta.view(), &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dgamma_num = eval_numerical_gradient_array(
        |g| groupnorm_forward(&x, g.view(), beta.view(), &param).map(|r| r.0),
        &gamma,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_spatial_batchnorm_gradients() {
    let mut rng = rng();
    let (n, c, h, w) = (2, 3, 4, 5);
    let x: Array4<f64> = randn::<f64, _, _, _>((n, c, h, w), 5.0, &mut rng).mapv(|v| v + 12.0);
    let gamma: Array1<f64> = randn(c, 1.0, &mut rng);
    let beta: Array1<f64> = randn(c, 1.0, &mut rng);
    let dout: Array4<f64> = randn((n, c, h, w), 1.0, &mut rng);
    let mut param = BatchNormParam::with_defaults(c);

    let (_, cache) =
        spatial_batchnorm_forward(&x, gamma.view(), beta.view(), &mut param, Mode::Train)
            .unwrap();
    let (dx, dgamma, dbeta) = spatial_batchnorm_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| {
            spatial_batchnorm_forward(x, gamma.view(), beta.view(), &mut param, Mode::Train)
                .map(|r| r.0)
        },
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dgamma_num = eval_numerical_gradient_array(
        |g| {
            spatial_batchnorm_forward(&x, g.view(), beta.view(), &mut param, Mode::Train)
                .map(|r| r.0)
        },
        &gamma,
        &dout,
        H,
    )
    .unwrap();
    let dbeta_num = eval_numerical_gradient_array(
        |b| {
            spatial_batchnorm_forward(&x, gamma.view(), b.view(), &mut param, Mode::Train)
                .map(|r| r.0)
        },
        &beta,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
    check("dbeta", &dbeta.into_dyn(), &dbeta_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_spatial_groupnorm_gradients() {
    let mut rng = rng();
    let (n, c, h, w) = (2, 6, 4, 5);
    let x: Array4<f64> = randn::<f64, _, _, _>((n, c, h, w), 5.0, &mut rng).mapv(|v| v + 12.0);
    let gamma: Array1<f64> = randn(c, 1.0, &mut rng);
    let beta: Array1<f64> = randn(c, 1.0, &mut rng);
    let dout: Array4<f64> = randn((n, c, h, w), 1.0, &mut rng);
    let param = GroupNormParam::new(2, 1e-5).unwrap();

    let (_, cache) = spatial_groupnorm_forward(&x, gamma.view(), beta.view(), &param).unwrap();
    let (dx, dgamma, dbeta) = spatial_groupnorm_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| spatial_groupnorm_forward(x, gamma.view(), beta.view(), &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dgamma_num = eval_numerical_gradient_array(
        |g| spatial_groupnorm_forward(&x, g.view(), beta.view(), &param).map(|r| r.0),
        &gamma,
        &dout,
        H,
    )
    .unwrap();
    let dbeta_num = eval_numerical_gradient_array(
        |b| spatial_groupnorm_forward(&x, gamma.view(), b.view(), &param).map(|r| r.0),
        &beta,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
    check("dbeta", &dbeta.into_dyn(), &dbeta_num.into_dyn(), LAYER_TOL);
}

// ============================================================================
// Convolution and Pooling
// ============================================================================

#[test]
fn test_conv_naive_gradients() {
    let mut rng = rng();
    let x: Array4<f64> = randn((4, 3, 5, 5), 1.0, &mut rng);
    let w: Array4<f64> = randn((2, 3, 3, 3), 1.0, &mut rng);
    let b: Array1<f64> = randn(2, 1.0, &mut rng);
    let dout: Array4<f64> = randn((4, 2, 5, 5), 1.0, &mut rng);
    let param = ConvParam::new(1, 1).unwrap();

    let (_, cache) = conv_forward_naive(&x, w.view(), b.view(), &param).unwrap();
    let (dx, dw, db) = conv_backward_naive(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| conv_forward_naive(x, w.view(), b.view(), &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dw_num = eval_numerical_gradient_array(
        |w| conv_forward_naive(&x, w.view(), b.view(), &param).map(|r| r.0),
        &w,
        &dout,
        H,
    )
    .unwrap();
    let db_num = eval_numerical_gradient_array(
        |b| conv_forward_naive(&x, w.view(), b.view(), &param).map(|r| r.0),
        &b,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dw", &dw.into_dyn(), &dw_num.into_dyn(), LAYER_TOL);
    check("db", &db.into_dyn(), &db_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_conv_im2col_gradients_strided() {
    let mut rng = rng();
    let x: Array4<f64> = randn((2, 3, 7, 7), 1.0, &mut rng);
    let w: Array4<f64> = randn((4, 3, 3, 3), 1.0, &mut rng);
    let b: Array1<f64> = randn(4, 1.0, &mut rng);
    let dout: Array4<f64> = randn((2, 4, 3, 3), 1.0, &mut rng);
    let param = ConvParam::new(2, 0).unwrap();

    let (_, cache) = conv_forward_im2col(&x, w.view(), b.view(), &param).unwrap();
    let (dx, dw, _) = conv_backward_im2col(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| conv_forward_im2col(x, w.view(), b.view(), &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dw_num = eval_numerical_gradient_array(
        |w| conv_forward_im2col(&x, w.view(), b.view(), &param).map(|r| r.0),
        &w,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
    check("dw", &dw.into_dyn(), &dw_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_max_pool_gradients() {
    let mut rng = rng();
    let x: Array4<f64> = randn((3, 2, 8, 8), 1.0, &mut rng);
    let dout: Array4<f64> = randn((3, 2, 4, 4), 1.0, &mut rng);
    let param = PoolParam::new(2, 2, 2).unwrap();

    let (_, cache) = max_pool_forward_naive(&x, &param).unwrap();
    let dx = max_pool_backward_naive(&dout, cache).unwrap();
    let dx_num = eval_numerical_gradient_array(
        |x| max_pool_forward_naive(x, &param).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx.into_dyn(), &dx_num.into_dyn(), LAYER_TOL);
}

// ============================================================================
// Losses and Composite Layers
// ============================================================================

#[test]
fn test_loss_gradients() {
    let mut rng = rng();
    let (n, c) = (50, 10);
    let scores: Array2<f64> = randn((n, c), 1e-3, &mut rng);
    let labels: Vec<usize> = (0..n).map(|i| (i * 7) % c).collect();

    let (_, dsoftmax) = softmax_loss(&scores, &labels).unwrap();
    let dsoftmax_num =
        eval_numerical_gradient(|s| softmax_loss(s, &labels).map(|r| r.0), &scores, H).unwrap();
    check("softmax", &dsoftmax.into_dyn(), &dsoftmax_num.into_dyn(), LAYER_TOL);

    let (_, dsvm) = svm_loss(&scores, &labels).unwrap();
    let dsvm_num =
        eval_numerical_gradient(|s| svm_loss(s, &labels).map(|r| r.0), &scores, H).unwrap();
    check("svm", &dsvm.into_dyn(), &dsvm_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_affine_relu_gradients() {
    let mut rng = rng();
    let x: ArrayD<f64> = randn((2, 3, 4), 1.0, &mut rng).into_dyn();
    let w: Array2<f64> = randn((12, 10), 1.0, &mut rng);
    let b: Array1<f64> = randn(10, 1.0, &mut rng);
    let dout: Array2<f64> = randn((2, 10), 1.0, &mut rng);

    let (_, cache) = affine_relu_forward(&x, w.view(), b.view()).unwrap();
    let (dx, dw, db) = affine_relu_backward(&dout, cache).unwrap();

    let dx_num = eval_numerical_gradient_array(
        |x| affine_relu_forward(x, w.view(), b.view()).map(|r| r.0),
        &x,
        &dout,
        H,
    )
    .unwrap();
    let dw_num = eval_numerical_gradient_array(
        |w| affine_relu_forward(&x, w.view(), b.view()).map(|r| r.0),
        &w,
        &dout,
        H,
    )
    .unwrap();
    let db_num = eval_numerical_gradient_array(
        |b| affine_relu_forward(&x, w.view(), b.view()).map(|r| r.0),
        &b,
        &dout,
        H,
    )
    .unwrap();

    check("dx", &dx, &dx_num, LAYER_TOL);
    check("dw", &dw.into_dyn(), &dw_num.into_dyn(), LAYER_TOL);
    check("db", &db.into_dyn(), &db_num.into_dyn(), LAYER_TOL);
}

#[test]
fn test_affine_layernorm_relu_dropout_gradients() {
    let mut rng = rng();
    let x: ArrayD<f64> = randn((6, 5), 1.0, &mut rng).into_dyn();
    let w: Array2<f64> = randn((5, 7), 1.0, &mut rng);
    let b: Array1<f64> = randn(7, 1.0, &mut rng);
    let gamma: Array1<f64> = randn(7, 1.0, &mut rng);
    let beta: Array1<f64> = randn(7, 1.0, &mut rng);
    let dout: Array2<f64> = randn((6, 7), 1.0, &mut rng);
    let norm = LayerNormParam::default();
    let dropout = DropoutParam::new(0.7, Some(17)).unwrap();

    let forward = |x: &ArrayD<f64>, w: &Array2<f64>, gamma: &Array1<f64>| {
        affine_norm_relu_dropout_forward(
            x,
            w.view(),
            b.view(),
            NormStage::Layer {
                gamma: gamma.view(),
                beta: beta.view(),
                param: &norm,
            },
            Some(&dropout),
            Mode::Train,
        )
    };

    let (_, cache) = forward(&x, &w, &gamma).unwrap();
    let grads = affine_norm_relu_dropout_backward(&dout, cache).unwrap();

    let dx_num =
        eval_numerical_gradient_array(|x| forward(x, &w, &gamma).map(|r| r.0), &x, &dout, H)
            .unwrap();
    let dw_num =
        eval_numerical_gradient_array(|w| forward(&x, w, &gamma).map(|r| r.0), &w, &dout, H)
            .unwrap();
    let dgamma_num =
        eval_numerical_gradient_array(|g| forward(&x, &w, g).map(|r| r.0), &gamma, &dout, H)
            .unwrap();

    check("dx", &grads.dx, &dx_num, LAYER_TOL);
    check("dw", &grads.dw.into_dyn(), &dw_num.into_dyn(), LAYER_TOL);
    let dgamma = grads.dgamma.expect("layer norm produces dgamma");
    check("dgamma", &dgamma.into_dyn(), &dgamma_num.into_dyn(), LAYER_TOL);
}

// ============================================================================
// Network Models
// ============================================================================

/// Checks every parameter gradient of `model`. With `batchnorm`, hidden-layer biases feed
/// straight into batch normalization, which cancels them; their gradient must vanish.
fn check_model<M: Model<f64>>(
    model: &mut M,
    x: &ArrayD<f64>,
    labels: &[usize],
    batchnorm: bool,
    name: &str,
) {
    let (_, grads) = model.loss(x, Some(labels)).unwrap().into_train().unwrap();
    let keys: Vec<String> = model.params().keys().cloned().collect();
    assert_eq!(
        grads.keys().cloned().collect::<Vec<_>>(),
        keys,
        "{}: gradient keys must match parameter keys",
        name
    );

    for key in keys {
        let numeric = model_numerical_gradient(model, x, labels, &key, H).unwrap();
        let analytic = &grads[&key];
        let gamma_key = key.replacen('b', "gamma", 1);
        if batchnorm && key.starts_with('b') && model.params().contains_key(&gamma_key) {
            assert!(analytic.iter().all(|v| v.abs() < 1e-7), "{} {}", name, key);
            assert!(numeric.iter().all(|v| v.abs() < 1e-7), "{} {}", name, key);
        } else {
            let err = rel_error(analytic, &numeric);
            assert!(err < MODEL_TOL, "{} {} relative error {:e}", name, key, err);
        }
    }
}

fn fc_config(normalization: Normalization, keep: f64, reg: f64) -> NetConfig {
    let mut config = NetConfig::new(vec![20, 30]);
    config.input_dim = 15;
    config.num_classes = 10;
    config.weight_scale = 5e-2;
    config.reg = reg;
    config.normalization = normalization;
    config.dropout_keep_probability = keep;
    config.seed = Some(123);
    config
}

fn fc_data() -> (ArrayD<f64>, Vec<usize>) {
    let mut rng = seeded_rng(Some(7));
    let x: ArrayD<f64> = randn((5, 15), 1.0, &mut rng).into_dyn();
    let labels = vec![1, 4, 9, 0, 6];
    (x, labels)
}

#[test]
fn test_two_layer_net_gradients() {
    let mut rng = rng();
    let mut net = TwoLayerNet::<f64>::new(15, 20, 10, 1e-1, 0.7, &mut rng).unwrap();
    let (x, labels) = fc_data();
    check_model(&mut net, &x, &labels, false, "two-layer");
}

#[test]
fn test_fc_net_gradients_plain() {
    for reg in [0.0, 3.5] {
        let mut rng = rng();
        let mut net =
            FullyConnectedNet::<f64>::new(&fc_config(Normalization::None, 1.0, reg), &mut rng)
                .unwrap();
        let (x, labels) = fc_data();
        check_model(&mut net, &x, &labels, false, "plain");
    }
}

#[test]
fn test_fc_net_gradients_batchnorm() {
    let mut rng = rng();
    let mut net =
        FullyConnectedNet::<f64>::new(&fc_config(Normalization::BatchNorm, 1.0, 0.5), &mut rng)
            .unwrap();
    let (x, labels) = fc_data();
    check_model(&mut net, &x, &labels, true, "batchnorm");
}

#[test]
fn test_fc_net_gradients_layernorm() {
    let mut rng = rng();
    let mut net =
        FullyConnectedNet::<f64>::new(&fc_config(Normalization::LayerNorm, 1.0, 0.5), &mut rng)
            .unwrap();
    let (x, labels) = fc_data();
    check_model(&mut net, &x, &labels, false, "layernorm");
}

#[test]
fn test_fc_net_gradients_dropout() {
    let mut rng = rng();
    let mut net =
        FullyConnectedNet::<f64>::new(&fc_config(Normalization::None, 0.5, 0.0), &mut rng)
            .unwrap();
    let (x, labels) = fc_data();
    check_model(&mut net, &x, &labels, false, "dropout");
}
