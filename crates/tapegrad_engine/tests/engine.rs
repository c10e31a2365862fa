mod utils;

use tapegrad_core::{
    attrs,
    dtype::DType,
    env::EnvFlags,
    error::{Error, Result},
    kernel::{KernelArgs, KernelConfig, TensorInfo},
    kernel_names::SQUARE,
};
use tapegrad_cpu::CPU_BACKEND_NAME;
use tapegrad_engine::NamedTensors;
use utils::{assert_close, read, setup_engine, setup_engine_with_flags};

/// Writes one buffer it never returns.
fn leaky_kernel(args: KernelArgs<'_>) -> Result<Vec<TensorInfo>> {
    let x = args.inputs.require("x")?;
    let values = args.backend.read_sync(x.data_id)?;
    args.backend.write(values.clone(), &x.shape, x.dtype)?;
    let out = args.backend.write(values, &x.shape, x.dtype)?;
    Ok(vec![TensorInfo::new(out, &x.shape, x.dtype)])
}

#[test]
fn leaking_kernels_are_reported() -> Result<()> {
    let engine = setup_engine()?;
    engine.register_kernel(KernelConfig::new("Leaky", CPU_BACKEND_NAME, leaky_kernel));
    let x = engine.tensor(vec![1.0, 2.0], &[2])?;

    let err = engine
        .run_kernel("Leaky", &NamedTensors::new().with("x", x.clone()), &attrs! {})
        .unwrap_err();
    assert_eq!(
        err,
        Error::MemoryLeak {
            backend: CPU_BACKEND_NAME.into(),
            kernel: "Leaky".into(),
            leaked: 1,
        }
    );
    Ok(())
}

#[test]
fn leak_checks_are_off_in_production() -> Result<()> {
    let engine = setup_engine_with_flags(EnvFlags::test().with_prod(true))?;
    engine.register_kernel(KernelConfig::new("Leaky", CPU_BACKEND_NAME, leaky_kernel));
    let x = engine.tensor(vec![1.0, 2.0], &[2])?;

    let out = engine.run_kernel_single("Leaky", &NamedTensors::new().with("x", x), &attrs! {})?;
    assert_close(&read(&engine, &out)?, &[1.0, 2.0]);
    Ok(())
}

#[test]
fn dispatch_errors() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0], &[2])?;
    let b = engine.tensor(vec![1.0, 2.0, 3.0], &[3])?;
    let i = engine.make_tensor(vec![1i32, 2], &[2], DType::I32)?;

    let err = engine.run_kernel("Nope", &NamedTensors::new(), &attrs! {}).unwrap_err();
    assert_eq!(
        err,
        Error::KernelNotFound {
            kernel: "Nope".into(),
            backend: CPU_BACKEND_NAME.into(),
        }
    );
    assert!(matches!(engine.add(&a, &b), Err(Error::DimensionMismatch { .. })));
    assert!(matches!(engine.add(&a, &i), Err(Error::DTypeMismatch { .. })));
    assert!(matches!(engine.exp(&i), Err(Error::DTypeMismatch { .. })));
    assert!(matches!(engine.tensor(vec![1.0], &[2]), Err(Error::InvalidArgument(_))));

    engine.dispose_tensor(&a);
    assert_eq!(engine.neg(&a).unwrap_err(), Error::TensorDisposed { id: a.id().0 });
    Ok(())
}

#[test]
fn integer_arithmetic_and_casts() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.make_tensor(vec![7i32, -7], &[2], DType::I32)?;
    let b = engine.make_tensor(vec![2i32, 2], &[2], DType::I32)?;

    let q = engine.div(&a, &b)?;
    assert_eq!(q.dtype(), DType::I32);
    assert_eq!(read(&engine, &q)?, vec![3.0, -4.0]);

    let f = engine.cast(&a, DType::F32)?;
    assert_eq!(f.dtype(), DType::F32);
    assert_eq!(read(&engine, &f)?, vec![7.0, -7.0]);

    let filled = engine.fill(&[2, 2], 1.5, DType::F32)?;
    assert_eq!(filled.shape(), &[2, 2]);
    assert_eq!(read(&engine, &filled)?, vec![1.5; 4]);
    assert_eq!(read(&engine, &engine.zeros_like(&a)?)?, vec![0.0, 0.0]);
    Ok(())
}

#[test]
fn non_finite_outputs_only_warn() -> Result<()> {
    let engine = setup_engine_with_flags(EnvFlags::test().with_check_computation(true).with_debug(true))?;
    let one = engine.scalar(1.0)?;
    let zero = engine.scalar(0.0)?;

    let inf = engine.div(&one, &zero)?;
    assert!(read(&engine, &inf)?[0].is_infinite());
    Ok(())
}

#[test]
fn variables_follow_assignments() -> Result<()> {
    let engine = setup_engine()?;
    let init = engine.tensor(vec![1.0, 2.0], &[2])?;
    let v = engine.make_variable(&init, true, Some("w"), None)?;
    engine.dispose_tensor(&init);

    assert_eq!(read(&engine, v.tensor())?, vec![1.0, 2.0]);
    assert_eq!(engine.variable("w").map(|w| w.id()), Some(v.id()));

    let next = engine.tensor(vec![5.0, 6.0], &[2])?;
    engine.assign(&v, &next)?;
    assert_eq!(read(&engine, v.tensor())?, vec![5.0, 6.0]);
    assert_eq!(engine.data_id(v.tensor())?, engine.data_id(&next)?);
    assert_eq!(engine.ref_count(&next)?, 2);
    // the initial buffer lost its last claim
    assert_eq!(engine.num_data_buffers(), 1);

    // survives scopes
    engine.tidy(|e| {
        let doubled = e.add(v.tensor(), v.tensor())?;
        e.assign(&v, &doubled)
    })?;
    assert_eq!(read(&engine, v.tensor())?, vec![10.0, 12.0]);
    Ok(())
}

#[test]
fn rejected_assignments_change_nothing() -> Result<()> {
    let engine = setup_engine()?;
    let v = engine.make_variable(&engine.tensor(vec![1.0, 2.0], &[2])?, true, Some("w"), None)?;
    let before = engine.data_id(v.tensor())?;

    let ints = engine.make_tensor(vec![1i32, 2], &[2], DType::I32)?;
    assert!(matches!(engine.assign(&v, &ints), Err(Error::DTypeMismatch { .. })));

    let longer = engine.tensor(vec![1.0, 2.0, 3.0], &[3])?;
    assert_eq!(
        engine.assign(&v, &longer).unwrap_err(),
        Error::DimensionMismatch {
            expected: vec![2],
            got: vec![3],
            msg: "shape of the new value must match variable 'w'".into(),
        }
    );

    assert_eq!(engine.data_id(v.tensor())?, before);
    assert_eq!(read(&engine, v.tensor())?, vec![1.0, 2.0]);
    Ok(())
}

#[test]
fn variable_registry() -> Result<()> {
    let engine = setup_engine()?;
    let init = engine.scalar(1.0)?;
    let named = engine.make_variable(&init, true, Some("bias"), None)?;
    let unnamed = engine.make_variable(&init, false, None, Some(DType::I32))?;

    assert_eq!(unnamed.dtype(), DType::I32);
    assert_eq!(read(&engine, unnamed.tensor())?, vec![1.0]);
    assert_eq!(
        engine.make_variable(&init, true, Some("bias"), None).unwrap_err(),
        Error::DuplicateVariable("bias".into())
    );
    assert_eq!(engine.registered_variables().len(), 2);

    engine.dispose_variable(&named)?;
    assert!(engine.variable("bias").is_none());
    assert!(matches!(engine.read_sync(named.tensor()), Err(Error::TensorDisposed { .. })));
    assert_eq!(
        engine.dispose_variable(&named).unwrap_err(),
        Error::VariableNotFound("bias".into())
    );

    engine.dispose_variables();
    assert!(engine.registered_variables().is_empty());
    assert_eq!(engine.num_tensors(), 1);
    Ok(())
}

#[test]
fn variable_gradients() -> Result<()> {
    let engine = setup_engine()?;
    let w = engine.make_variable(&engine.tensor(vec![1.0, 2.0, 3.0], &[3])?, true, Some("w"), None)?;
    let frozen = engine.make_variable(&engine.tensor(vec![4.0, 5.0, 6.0], &[3])?, false, Some("frozen"), None)?;

    let result = engine.variable_grads(|e| e.sum(&e.mul(w.tensor(), frozen.tensor())?), None)?;
    assert_close(&read(&engine, &result.value)?, &[32.0]);
    let dw = result.grads["w"].clone().ok_or(Error::NoGradientForInput { index: 0 })?;
    assert_close(&read(&engine, &dw)?, &[4.0, 5.0, 6.0]);
    assert!(result.grads["frozen"].is_none());

    let err = engine
        .variable_grads(|e| e.mul(w.tensor(), w.tensor()), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = engine
        .variable_grads(|e| e.sum(frozen.tensor()), Some(&[frozen.clone()]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let other = engine.scalar(2.0)?;
    let err = engine
        .variable_grads(|e| e.square(&other), Some(&[w.clone()]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(engine.gradient_depth(), 0);
    Ok(())
}

#[test]
fn memory_accounting() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0, 3.0], &[3])?;
    let _b = engine.clone_tensor(&a)?;

    let memory = engine.memory()?;
    assert_eq!(memory.num_tensors, 2);
    assert_eq!(memory.num_data_buffers, 1);
    assert_eq!(memory.num_bytes, 24);
    assert!(!memory.unreliable);

    let _s = engine.make_tensor(vec!["ab", "c"], &[2], DType::STRING)?;
    let memory = engine.memory()?;
    assert!(memory.unreliable);
    assert!(!memory.reasons.is_empty());
    Ok(())
}

#[test]
fn profiling_records_kernels() -> Result<()> {
    let engine = setup_engine()?;

    let (info, result) = engine.profile(|e| {
        let a = e.tensor(vec![1.0, 2.0, 3.0, 4.0], &[4])?;
        let b = e.square(&a)?;
        e.dispose_tensor(&a);
        Ok(b)
    })?;

    assert_eq!(info.kernel_names, vec![SQUARE.to_string()]);
    assert_eq!(info.kernels.len(), 1);
    assert_eq!(info.new_tensors, 1);
    assert_eq!(info.new_bytes, 16);
    assert_eq!(info.peak_bytes, 32);
    let kernel = &info.kernels[0];
    assert_eq!(kernel.bytes_added, 16);
    assert_eq!(kernel.tensors_added, 1);
    assert_eq!(kernel.input_shapes, vec![vec![4]]);
    assert_eq!(kernel.output_shapes, vec![vec![4]]);
    assert_eq!(read(&engine, &result)?, vec![1.0, 4.0, 9.0, 16.0]);

    let timing = engine.time(|e| {
        e.square(&result)?;
        Ok(())
    })?;
    assert!(timing.wall_ms >= 0.0);
    assert!(timing.kernel_ms >= 0.0);
    Ok(())
}

#[test]
fn reset_keeps_registrations() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0], &[1])?;
    engine.make_variable(&a, true, Some("v"), None)?;
    assert_eq!(engine.backend_name().as_deref(), Some(CPU_BACKEND_NAME));

    engine.reset();

    assert_eq!(engine.num_tensors(), 0);
    assert!(engine.registered_variables().is_empty());
    assert!(engine.backend_name().is_none());
    assert!(engine.is_disposed(&a));

    let b = engine.square(&engine.scalar(3.0)?)?;
    assert_eq!(read(&engine, &b)?, vec![9.0]);
    assert_eq!(engine.backend_name().as_deref(), Some(CPU_BACKEND_NAME));
    Ok(())
}
