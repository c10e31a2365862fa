mod utils;

use proptest::prelude::*;
use tapegrad_core::error::{Error, Result};
use tapegrad_engine::{Engine, Tensor};
use utils::{assert_close, read, setup_engine};

#[test]
fn tidy_disposes_intermediates() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0, 3.0], &[3])?;
    let before = engine.num_tensors();

    let result = engine.tidy(|e| {
        let b = e.add(&a, &a)?;
        let c = e.mul(&b, &b)?;
        e.sub(&c, &a)
    })?;

    assert_eq!(engine.num_tensors(), before + 1);
    assert_eq!(engine.num_data_buffers(), 2);
    assert_close(&read(&engine, &result)?, &[3.0, 14.0, 33.0]);
    assert_eq!(engine.scope_depth(), 0);
    Ok(())
}

#[test]
fn reading_disposed_intermediate_fails() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0], &[2])?;

    let mut inner = None;
    engine.tidy(|e| {
        inner = Some(e.neg(&a)?);
        Ok(())
    })?;
    let inner = inner.ok_or(Error::InvalidState("tidy closure did not run".into()))?;

    assert!(engine.is_disposed(&inner));
    assert_eq!(
        engine.read_sync(&inner).unwrap_err(),
        Error::TensorDisposed { id: inner.id().0 }
    );
    Ok(())
}

#[test]
fn kept_tensors_survive_their_scope() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0], &[2])?;

    let mut kept = None;
    engine.tidy(|e| {
        let doubled = e.add(&a, &a)?;
        kept = Some(e.keep(&doubled)?);
        Ok(())
    })?;
    let kept = kept.ok_or(Error::InvalidState("tidy closure did not run".into()))?;

    assert!(engine.is_kept(&kept));
    assert_close(&read(&engine, &kept)?, &[2.0, 4.0]);

    engine.dispose_tensor(&kept);
    assert!(engine.is_disposed(&kept));
    Ok(())
}

#[test]
fn nested_result_moves_to_the_enclosing_scope() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![4.0], &[1])?;

    let mut from_inner = None;
    let outer = engine.tidy(|e| {
        let inner = e.tidy(|e| {
            let t = e.square(&a)?;
            e.neg(&t)
        })?;
        assert!(!e.is_disposed(&inner));
        from_inner = Some(inner.clone());
        e.add(&inner, &a)
    })?;
    let from_inner = from_inner.ok_or(Error::InvalidState("tidy closure did not run".into()))?;

    assert!(engine.is_disposed(&from_inner));
    assert_close(&read(&engine, &outer)?, &[-12.0]);
    assert_eq!(engine.num_tensors(), 2);
    Ok(())
}

#[test]
fn tidy_closes_the_scope_on_error() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, 2.0], &[2])?;

    let err = engine
        .tidy(|e: &Engine| -> Result<Tensor> {
            let _b = e.add(&a, &a)?;
            Err(Error::InvalidState("failed halfway".into()))
        })
        .unwrap_err();

    assert_eq!(err, Error::InvalidState("failed halfway".into()));
    assert_eq!(engine.scope_depth(), 0);
    assert_eq!(engine.num_tensors(), 1);
    assert_eq!(engine.num_data_buffers(), 1);
    Ok(())
}

#[test]
fn manual_scopes() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0, -1.0], &[2])?;

    engine.start_scope(Some("manual"));
    let kept = engine.add(&a, &a)?;
    let dropped = engine.neg(&a)?;
    assert_eq!(engine.scope_depth(), 1);
    engine.end_scope(&kept)?;

    assert_eq!(engine.scope_depth(), 0);
    assert!(!engine.is_disposed(&kept));
    assert!(engine.is_disposed(&dropped));
    assert!(matches!(engine.end_scope(&()), Err(Error::InvalidState(_))));
    Ok(())
}

#[test]
fn shared_data_outlives_one_handle() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![7.0, 8.0], &[2])?;
    let b = engine.clone_tensor(&a)?;

    assert_eq!(engine.data_id(&a)?, engine.data_id(&b)?);
    assert_eq!(engine.ref_count(&a)?, 2);
    assert_eq!(engine.num_data_buffers(), 1);

    engine.dispose_tensor(&a);
    assert_eq!(engine.ref_count(&b)?, 1);
    assert_close(&read(&engine, &b)?, &[7.0, 8.0]);
    assert!(matches!(engine.read_sync(&a), Err(Error::TensorDisposed { .. })));

    engine.dispose(&vec![b.clone()]);
    assert_eq!(engine.num_data_buffers(), 0);
    assert_eq!(engine.num_tensors(), 0);
    Ok(())
}

#[test]
fn disposing_containers() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.scalar(1.0)?;
    let b = engine.scalar(2.0)?;
    let c = engine.scalar(3.0)?;

    engine.dispose(&(a.clone(), vec![b.clone()], Some(c.clone())));
    // disposing twice is a no-op
    engine.dispose(&[a.clone(), b.clone()]);

    assert_eq!(engine.num_tensors(), 0);
    Ok(())
}

#[tokio::test]
async fn async_read_is_refused_inside_a_scope() -> Result<()> {
    let engine = setup_engine()?;
    let a = engine.tensor(vec![1.0], &[1])?;

    engine.start_scope(Some("sync only"));
    let err = engine.read(&a).await.unwrap_err();
    engine.end_scope(&())?;

    assert!(matches!(err, Error::AsyncInScope(_)));
    assert_eq!(engine.read(&a).await?.to_f32_vec()?, vec![1.0]);
    Ok(())
}

proptest! {
    #[test]
    fn tidy_keeps_only_the_result(adds in 0usize..12, squares in 0usize..4) {
        let engine = setup_engine().unwrap();
        let x = engine.tensor(vec![0.5, -0.5], &[2]).unwrap();
        let start = engine.num_tensors();

        let result = engine
            .tidy(|e| {
                let mut acc = e.clone_tensor(&x)?;
                for _ in 0..adds {
                    acc = e.add(&acc, &x)?;
                }
                e.tidy(|e| {
                    let mut t = e.neg(&acc)?;
                    for _ in 0..squares {
                        t = e.square(&t)?;
                    }
                    Ok(t)
                })
            })
            .unwrap();

        prop_assert_eq!(engine.num_tensors(), start + 1);
        prop_assert_eq!(engine.num_data_buffers(), 2);
        prop_assert_eq!(engine.scope_depth(), 0);
        prop_assert!(!engine.is_disposed(&result));
    }
}
