mod utils;

use tapegrad_core::{
    attrs,
    attrs::AttrValue,
    backend::Backend,
    dtype::DType,
    error::{Error, Result},
    kernel::{KernelRegistry, NamedTensorInfoMap, TensorInfo},
    kernel_names,
    values::BackendValues,
};
use tapegrad_cpu::{register_cpu_kernels, CpuBackend};
use utils::{assert_close, read_f32, run, setup_f32, setup_i32};

fn binary_inputs(a: &TensorInfo, b: &TensorInfo) -> NamedTensorInfoMap {
    NamedTensorInfoMap::new().with("a", a.clone()).with("b", b.clone())
}

#[test]
fn add_sub_mul_div() -> Result<()> {
    let backend = CpuBackend::new();
    let a = setup_f32(&backend, vec![1.0, 2.0, 3.0, 4.0], &[2, 2])?;
    let b = setup_f32(&backend, vec![4.0, 3.0, 2.0, 1.0], &[2, 2])?;
    let inputs = binary_inputs(&a, &b);

    let cases = [
        (kernel_names::ADD, vec![5.0, 5.0, 5.0, 5.0]),
        (kernel_names::SUB, vec![-3.0, -1.0, 1.0, 3.0]),
        (kernel_names::MUL, vec![4.0, 6.0, 6.0, 4.0]),
        (kernel_names::DIV, vec![0.25, 2.0 / 3.0, 1.5, 4.0]),
    ];
    for (kernel, expected) in cases {
        let out = run(&backend, kernel, &inputs, &attrs! {})?;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shape, vec![2, 2]);
        assert_close(&read_f32(&backend, &out[0])?, &expected, 1e-6);
    }

    Ok(())
}

#[test]
fn binary_broadcasts_scalar_operand() -> Result<()> {
    let backend = CpuBackend::new();
    let a = setup_f32(&backend, vec![1.0, 2.0, 3.0], &[3])?;
    let s = setup_f32(&backend, vec![10.0], &[])?;

    let out = run(&backend, kernel_names::SUB, &binary_inputs(&s, &a), &attrs! {})?;
    assert_eq!(out[0].shape, vec![3]);
    assert_eq!(read_f32(&backend, &out[0])?, vec![9.0, 8.0, 7.0]);

    let out = run(&backend, kernel_names::MUL, &binary_inputs(&a, &s), &attrs! {})?;
    assert_eq!(read_f32(&backend, &out[0])?, vec![10.0, 20.0, 30.0]);

    Ok(())
}

#[test]
fn binary_rejects_incompatible_operands() -> Result<()> {
    let backend = CpuBackend::new();
    let a = setup_f32(&backend, vec![1.0, 2.0, 3.0], &[3])?;
    let b = setup_f32(&backend, vec![1.0, 2.0], &[2])?;
    let c = setup_i32(&backend, vec![1, 2, 3], &[3])?;

    let err = run(&backend, kernel_names::ADD, &binary_inputs(&a, &b), &attrs! {}).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    let err = run(&backend, kernel_names::ADD, &binary_inputs(&a, &c), &attrs! {}).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));

    let err = run(&backend, kernel_names::ADD, &NamedTensorInfoMap::new().with("a", a), &attrs! {}).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    Ok(())
}

#[test]
fn integer_arithmetic() -> Result<()> {
    let backend = CpuBackend::new();
    let a = setup_i32(&backend, vec![7, -7, 6], &[3])?;
    let b = setup_i32(&backend, vec![2, 2, 3], &[3])?;

    let out = run(&backend, kernel_names::DIV, &binary_inputs(&a, &b), &attrs! {})?;
    assert_eq!(backend.read_sync(out[0].data_id)?, BackendValues::I32(vec![3, -4, 2]));

    let out = run(&backend, kernel_names::SUM, &NamedTensorInfoMap::new().with("x", a), &attrs! {})?;
    assert_eq!(out[0].shape, Vec::<usize>::new());
    assert_eq!(backend.read_sync(out[0].data_id)?, BackendValues::I32(vec![6]));

    Ok(())
}

#[test]
fn unary_kernels() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![0.0, 1.0, -2.0], &[3])?;
    let inputs = NamedTensorInfoMap::new().with("x", x);

    let out = run(&backend, kernel_names::NEG, &inputs, &attrs! {})?;
    assert_eq!(read_f32(&backend, &out[0])?, vec![0.0, -1.0, 2.0]);

    let out = run(&backend, kernel_names::SQUARE, &inputs, &attrs! {})?;
    assert_eq!(read_f32(&backend, &out[0])?, vec![0.0, 1.0, 4.0]);

    let out = run(&backend, kernel_names::EXP, &inputs, &attrs! {})?;
    assert_close(&read_f32(&backend, &out[0])?, &[1.0, std::f32::consts::E, (-2.0f32).exp()], 1e-6);

    Ok(())
}

#[test]
fn exp_rejects_integers() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_i32(&backend, vec![1, 2], &[2])?;

    let err = run(&backend, kernel_names::EXP, &NamedTensorInfoMap::new().with("x", x), &attrs! {}).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { got: DType::I32, .. }));

    Ok(())
}

#[test]
fn sum_reduces_to_scalar() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, (1..=5_000).map(|i| i as f32).collect(), &[50, 100])?;

    let out = run(&backend, kernel_names::SUM, &NamedTensorInfoMap::new().with("x", x), &attrs! {})?;
    assert!(out[0].shape.is_empty());
    assert_eq!(read_f32(&backend, &out[0])?, vec![12_502_500.0]);

    Ok(())
}

#[test]
fn large_inputs_match_sequential_results() -> Result<()> {
    let backend = CpuBackend::new();
    let n = 10_000;
    let a = setup_f32(&backend, (0..n).map(|i| i as f32).collect(), &[n])?;
    let b = setup_f32(&backend, vec![2.0], &[])?;

    let out = run(&backend, kernel_names::MUL, &binary_inputs(&a, &b), &attrs! {})?;
    let values = read_f32(&backend, &out[0])?;
    assert_eq!(values.len(), n);
    assert!(values.iter().enumerate().all(|(i, &v)| v == 2.0 * i as f32));

    Ok(())
}

#[test]
fn kernels_read_inputs_in_place() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![1.0, -2.0, 3.0], &[3])?;

    // the same buffer on both sides of a binary kernel
    let doubled = run(&backend, kernel_names::ADD, &binary_inputs(&x, &x), &attrs! {})?;
    assert_eq!(read_f32(&backend, &doubled[0])?, vec![2.0, -4.0, 6.0]);
    let negated = run(&backend, kernel_names::NEG, &NamedTensorInfoMap::new().with("x", x.clone()), &attrs! {})?;
    assert_eq!(read_f32(&backend, &negated[0])?, vec![-1.0, 2.0, -3.0]);
    let total = run(&backend, kernel_names::SUM, &NamedTensorInfoMap::new().with("x", x.clone()), &attrs! {})?;
    assert_eq!(read_f32(&backend, &total[0])?, vec![2.0]);

    assert_eq!(read_f32(&backend, &x)?, vec![1.0, -2.0, 3.0]);
    assert_eq!(backend.ref_count(x.data_id), 1);
    assert_eq!(backend.num_data_ids(), 4);

    Ok(())
}

#[test]
fn identity_shares_data() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![1.0, 2.0], &[2])?;

    let out = run(&backend, kernel_names::IDENTITY, &NamedTensorInfoMap::new().with("x", x.clone()), &attrs! {})?;
    assert_eq!(out[0].data_id, x.data_id);
    assert_eq!(backend.ref_count(x.data_id), 2);
    assert_eq!(backend.num_data_ids(), 1);

    Ok(())
}

#[test]
fn cast_and_fill() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![1.7, -0.2, 0.0], &[3])?;

    let out = run(
        &backend,
        kernel_names::CAST,
        &NamedTensorInfoMap::new().with("x", x),
        &attrs! { "dtype" => AttrValue::DType(DType::I32) },
    )?;
    assert_eq!(out[0].dtype, DType::I32);
    assert_eq!(backend.read_sync(out[0].data_id)?, BackendValues::I32(vec![1, 0, 0]));

    let out = run(
        &backend,
        kernel_names::FILL,
        &NamedTensorInfoMap::new(),
        &attrs! {
            "shape" => AttrValue::Shape(vec![2, 3]),
            "value" => AttrValue::Float(1.5),
            "dtype" => AttrValue::DType(DType::F32),
        },
    )?;
    assert_eq!(out[0].shape, vec![2, 3]);
    assert_eq!(read_f32(&backend, &out[0])?, vec![1.5; 6]);

    let err = run(&backend, kernel_names::FILL, &NamedTensorInfoMap::new(), &attrs! {}).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    Ok(())
}

#[test]
fn registry_copies_kernels_to_new_backend_name() -> Result<()> {
    let registry = KernelRegistry::new();
    register_cpu_kernels(&registry, "cpu");
    let count = registry.kernels_for_backend("cpu").len();
    assert_eq!(count, 11);

    registry.copy_registered_kernels("cpu", "cpu-variant");
    assert_eq!(registry.kernels_for_backend("cpu-variant").len(), count);
    assert!(registry.get(kernel_names::ADD, "cpu-variant").is_some());

    registry.unregister(kernel_names::ADD, "cpu-variant")?;
    assert!(registry.get(kernel_names::ADD, "cpu-variant").is_none());
    assert!(registry.get(kernel_names::ADD, "cpu").is_some());
    assert!(matches!(
        registry.unregister(kernel_names::ADD, "cpu-variant"),
        Err(Error::KernelNotFound { .. })
    ));

    Ok(())
}
