mod utils;

use tapegrad_core::{
    backend::{Backend, FloatPrecision},
    data::next_data_id,
    dtype::DType,
    error::{Error, Result},
    values::BackendValues,
};
use tapegrad_cpu::CpuBackend;
use utils::{read_f32, setup_f32};

#[test]
fn write_then_read() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![1.0, 2.0, 3.0, 4.0], &[2, 2])?;

    assert_eq!(read_f32(&backend, &x)?, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(backend.ref_count(x.data_id), 1);
    assert_eq!(backend.num_data_ids(), 1);

    Ok(())
}

#[test]
fn write_rejects_mismatched_values() -> Result<()> {
    let backend = CpuBackend::new();

    let err = backend.write(vec![1.0f32, 2.0].into(), &[3], DType::F32).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    let err = backend.write(vec![1i32, 2].into(), &[2], DType::F32).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));
    assert_eq!(backend.num_data_ids(), 0);

    Ok(())
}

#[test]
fn dispose_respects_ref_count() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![1.0, 2.0], &[2])?;
    backend.inc_ref(x.data_id)?;
    assert_eq!(backend.ref_count(x.data_id), 2);

    assert!(!backend.dispose_data(x.data_id, false));
    assert_eq!(backend.ref_count(x.data_id), 1);
    assert_eq!(read_f32(&backend, &x)?, vec![1.0, 2.0]);

    assert!(backend.dispose_data(x.data_id, false));
    assert_eq!(backend.ref_count(x.data_id), 0);
    assert!(matches!(backend.read_sync(x.data_id), Err(Error::DataNotFound { .. })));
    assert!(!backend.dispose_data(x.data_id, false));

    Ok(())
}

#[test]
fn forced_dispose_drops_every_claim() -> Result<()> {
    let backend = CpuBackend::new();
    let x = setup_f32(&backend, vec![5.0], &[])?;
    backend.inc_ref(x.data_id)?;
    backend.inc_ref(x.data_id)?;

    assert!(backend.dispose_data(x.data_id, true));
    assert_eq!(backend.num_data_ids(), 0);

    Ok(())
}

#[test]
fn move_data_keeps_id_and_ref_count() -> Result<()> {
    let source = CpuBackend::new();
    let target = CpuBackend::new();
    let x = setup_f32(&source, vec![0.5, -1.5, 2.25], &[3])?;

    let values = source.read_sync(x.data_id)?;
    target.move_data(x.data_id, values, &x.shape, x.dtype, 3)?;

    assert_eq!(target.ref_count(x.data_id), 3);
    assert_eq!(read_f32(&target, &x)?, vec![0.5, -1.5, 2.25]);

    Ok(())
}

#[test]
fn inc_ref_on_unknown_data_fails() {
    let backend = CpuBackend::new();
    let err = backend.inc_ref(next_data_id()).unwrap_err();
    assert!(matches!(err, Error::DataNotFound { .. }));
}

#[test]
fn memory_counts_bytes() -> Result<()> {
    let backend = CpuBackend::new();
    setup_f32(&backend, vec![0.0; 8], &[8])?;
    backend.write(BackendValues::from(vec![1i32, 2]), &[2], DType::I32)?;

    let memory = backend.memory()?;
    assert_eq!(memory.num_bytes, 8 * 4 + 2 * 4);
    assert_eq!(memory.num_data_ids, 2);
    assert!(!memory.unreliable);

    backend.write(BackendValues::from(vec!["ab", "cde"]), &[2], DType::STRING)?;
    let memory = backend.memory()?;
    assert_eq!(memory.num_bytes, 8 * 4 + 2 * 4 + 5);
    assert!(memory.unreliable);
    assert_eq!(memory.reasons.len(), 1);

    Ok(())
}

#[test]
fn half_precision_rounds_floats() -> Result<()> {
    let backend = CpuBackend::with_precision(FloatPrecision::Half);
    assert_eq!(backend.float_precision().bits(), 16);
    assert_eq!(backend.epsilon(), 1e-4);

    let x = setup_f32(&backend, vec![0.1, 1.0, 2049.0], &[3])?;
    let values = read_f32(&backend, &x)?;

    assert_eq!(values[1], 1.0);
    assert_ne!(values[0], 0.1);
    assert!((values[0] - 0.1).abs() < FloatPrecision::Half.test_epsilon());
    assert_eq!(values[2], 2048.0);

    Ok(())
}

#[test]
fn time_measures_closure() -> Result<()> {
    let backend = CpuBackend::new();
    assert!(backend.timer_available());

    let mut calls = 0;
    let timing = backend.time(&mut || {
        calls += 1;
        Ok::<(), Error>(())
    })?;
    assert_eq!(calls, 1);
    assert!(timing.kernel_ms >= 0.0);

    Ok(())
}

#[test]
fn dispose_clears_everything() -> Result<()> {
    let backend = CpuBackend::new();
    setup_f32(&backend, vec![1.0], &[1])?;
    setup_f32(&backend, vec![2.0], &[1])?;

    backend.dispose();
    assert_eq!(backend.num_data_ids(), 0);

    Ok(())
}
