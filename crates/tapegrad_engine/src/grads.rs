//! Backward functions of the built-in ops.

use crate::{
    engine::Engine,
    gradient::{GradConfig, GradContext, GradFn, GradientRegistry, NamedGradients},
    tensor::Tensor,
};
use std::sync::Arc;
use tapegrad_core::{
    dtype::DType,
    error::Result,
    kernel_names::{ADD, CAST, DIV, EXP, IDENTITY, MUL, NEG, SQUARE, SUB, SUM},
};

/// Reduces `dy` to the shape of `x`. Binary ops broadcast scalars only, so
/// a scalar `x` takes the sum of `dy`.
fn unbroadcast(engine: &Engine, dy: &Tensor, x: &Tensor) -> Result<Tensor> {
    if dy.shape() == x.shape() {
        engine.clone_tensor(dy)
    } else {
        engine.sum(dy)
    }
}

fn add_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let dy = ctx.dy()?;
    let mut grads = NamedGradients::new();
    for name in ["a", "b"] {
        if ctx.wants(name) {
            grads.insert(name, unbroadcast(ctx.engine, dy, ctx.input(name)?)?);
        }
    }
    Ok(grads)
}

fn sub_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let (engine, dy) = (ctx.engine, ctx.dy()?);
    let mut grads = NamedGradients::new();
    if ctx.wants("a") {
        grads.insert("a", unbroadcast(engine, dy, ctx.input("a")?)?);
    }
    if ctx.wants("b") {
        let neg = engine.neg(dy)?;
        grads.insert("b", unbroadcast(engine, &neg, ctx.input("b")?)?);
    }
    Ok(grads)
}

fn mul_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let (engine, dy) = (ctx.engine, ctx.dy()?);
    let (a, b) = (ctx.saved(0)?, ctx.saved(1)?);
    let mut grads = NamedGradients::new();
    if ctx.wants("a") {
        let da = engine.mul(dy, &engine.cast(b, DType::F32)?)?;
        grads.insert("a", unbroadcast(engine, &da, a)?);
    }
    if ctx.wants("b") {
        let db = engine.mul(dy, &engine.cast(a, DType::F32)?)?;
        grads.insert("b", unbroadcast(engine, &db, b)?);
    }
    Ok(grads)
}

fn div_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let (engine, dy) = (ctx.engine, ctx.dy()?);
    let (a, b) = (ctx.saved(0)?, ctx.saved(1)?);
    let a32 = engine.cast(a, DType::F32)?;
    let b32 = engine.cast(b, DType::F32)?;
    let mut grads = NamedGradients::new();
    if ctx.wants("a") {
        let da = engine.div(dy, &b32)?;
        grads.insert("a", unbroadcast(engine, &da, a)?);
    }
    if ctx.wants("b") {
        // d(a / b)/db = -a / b²
        let db = engine.neg(&engine.div(&engine.mul(dy, &a32)?, &engine.square(&b32)?)?)?;
        grads.insert("b", unbroadcast(engine, &db, b)?);
    }
    Ok(grads)
}

fn neg_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    Ok(NamedGradients::new().with("x", ctx.engine.neg(ctx.dy()?)?))
}

fn square_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let engine = ctx.engine;
    let x = engine.cast(ctx.saved(0)?, DType::F32)?;
    let two_x = engine.mul(&x, &engine.scalar(2.0)?)?;
    Ok(NamedGradients::new().with("x", engine.mul(ctx.dy()?, &two_x)?))
}

fn exp_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let y = ctx.saved(0)?;
    Ok(NamedGradients::new().with("x", ctx.engine.mul(ctx.dy()?, y)?))
}

fn sum_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    let engine = ctx.engine;
    let ones = engine.ones(ctx.input("x")?.shape(), DType::F32)?;
    Ok(NamedGradients::new().with("x", engine.mul(&ones, ctx.dy()?)?))
}

fn passthrough_grad(ctx: &GradContext<'_>) -> Result<NamedGradients> {
    Ok(NamedGradients::new().with("x", ctx.engine.clone_tensor(ctx.dy()?)?))
}

/// Backward function that hands `dy` through unchanged.
pub(crate) fn identity_grad() -> Arc<dyn GradFn> {
    Arc::new(passthrough_grad)
}

/// Registers the backward functions of every built-in op.
pub fn register_gradients(registry: &GradientRegistry) -> Result<()> {
    let configs = [
        GradConfig::new(ADD, add_grad),
        GradConfig::new(SUB, sub_grad),
        GradConfig::new(MUL, mul_grad).with_inputs_to_save(&["a", "b"]),
        GradConfig::new(DIV, div_grad).with_inputs_to_save(&["a", "b"]),
        GradConfig::new(NEG, neg_grad),
        GradConfig::new(SQUARE, square_grad).with_inputs_to_save(&["x"]),
        GradConfig::new(EXP, exp_grad).with_outputs_to_save(&[true]),
        GradConfig::new(SUM, sum_grad),
        GradConfig::new(CAST, passthrough_grad),
        GradConfig::new(IDENTITY, passthrough_grad),
    ];
    for config in configs {
        registry.register(config)?;
    }
    Ok(())
}
