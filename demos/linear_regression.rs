use tapegrad::prelude::*;
use std::time::Instant;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let engine = default_engine()?;
    engine.ready().await?;
    println!("Training on {:?}:", engine.backend_name());

    let x = engine.tensor(vec![1.0, 2.0, 3.0, 4.0], &[4])?;
    let y = engine.tensor(vec![3.0, 5.0, 7.0, 9.0], &[4])?;
    let lr = engine.scalar(0.01)?;
    let w = engine.make_variable(&engine.scalar(0.0)?, true, Some("weight"), None)?;
    let b = engine.make_variable(&engine.scalar(0.0)?, true, Some("bias"), None)?;

    let epochs = 200;
    for epoch in 0..epochs {
        let start_time = Instant::now();

        let loss = engine.tidy(|e| {
            let result = e.variable_grads(
                |e| {
                    let pred = e.add(&e.mul(&x, w.tensor())?, b.tensor())?;
                    e.sum(&e.square(&e.sub(&pred, &y)?)?)
                },
                None,
            )?;
            for var in [&w, &b] {
                if let Some(Some(grad)) = result.grads.get(var.name()) {
                    let next = e.sub(var.tensor(), &e.mul(grad, &lr)?)?;
                    e.assign(var, &next)?;
                }
            }
            Ok(result.value)
        })?;

        if epoch % 20 == 0 || epoch == epochs - 1 {
            println!(
                "Epoch {}: Loss = {:.4}, Time = {:?}, Weight = {:?}, Bias = {:?}",
                epoch,
                engine.read_f32_sync(&loss)?[0],
                start_time.elapsed(),
                engine.read_f32_sync(w.tensor())?,
                engine.read_f32_sync(b.tensor())?,
            );
        }
        engine.dispose_tensor(&loss);
    }

    let memory = engine.memory()?;
    println!("{} tensors, {} bytes still allocated", memory.num_tensors, memory.num_bytes);
    Ok(())
}
