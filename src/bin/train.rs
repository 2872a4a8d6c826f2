//! Meta-train a mixture of experts on sinusoid regression tasks
//!
//! Usage: cargo run --bin train -- --experts 3 --steps 5 --iterations 2000

use anyhow::Result;
use moe_maml_trading::prelude::*;
use std::env;
use std::fs::File;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut num_experts = 3usize;
    let mut inner_steps = 5usize;
    let mut inner_lr = 0.01f64;
    let mut meta_lr = 0.001f64;
    let mut iterations = 2000usize;
    let mut meta_batch_size = 4usize;
    let mut temperature = 1.0f64;
    let mut gate_mode = GateMode::Learned;
    let mut second_order = false;
    let mut out_path = "weights.json".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--experts" | "-n" => {
                num_experts = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(num_experts);
                i += 2;
            }
            "--steps" | "-k" => {
                inner_steps = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(inner_steps);
                i += 2;
            }
            "--inner-lr" => {
                inner_lr = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(inner_lr);
                i += 2;
            }
            "--meta-lr" => {
                meta_lr = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(meta_lr);
                i += 2;
            }
            "--iterations" | "-i" => {
                iterations = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(iterations);
                i += 2;
            }
            "--batch" | "-b" => {
                meta_batch_size = args
                    .get(i + 1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(meta_batch_size);
                i += 2;
            }
            "--temp" => {
                temperature = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(temperature);
                i += 2;
            }
            "--gate" => {
                gate_mode = match args.get(i + 1).map(String::as_str) {
                    Some("uniform") => GateMode::Uniform,
                    Some("onehot") => GateMode::OneHot,
                    _ => GateMode::Learned,
                };
                i += 2;
            }
            "--second-order" => {
                second_order = true;
                i += 1;
            }
            "--out" | "-o" => {
                out_path = args.get(i + 1).cloned().unwrap_or(out_path);
                i += 2;
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                i += 1;
            }
        }
    }

    println!("═══════════════════════════════════════════════════════════════");
    println!("        Mixture-of-Experts MAML  -  Sinusoid Meta-Training");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "experts={num_experts}  inner_steps={inner_steps}  inner_lr={inner_lr}  meta_lr={meta_lr}"
    );
    println!(
        "iterations={iterations}  batch={meta_batch_size}  gate={gate_mode:?}  temp={temperature}  second_order={second_order}"
    );
    println!();

    let config = MetaConfig::new()
        .with_num_experts(num_experts)
        .with_inner_steps(inner_steps)
        .with_inner_lr(inner_lr)
        .with_meta_lr(meta_lr)
        .with_first_order(!second_order)
        .with_gate_mode(gate_mode)
        .with_gate_temperature(temperature)
        .with_dims(1, 1)
        .with_hidden_dims(vec![40, 40]);

    let mut trainer = MetaTrainer::new(config)?;
    let generator = SinusoidTaskGenerator::new(SinusoidConfig::default());

    let log_interval = (iterations / 20).max(1);
    for iteration in 0..iterations {
        let tasks = generator.sample_batch(meta_batch_size);
        let stats = trainer.meta_train_step(&tasks)?;

        if iteration % log_interval == 0 {
            let final_step = trainer.config().inner_steps - 1;
            let expert_losses: Vec<String> = (0..num_experts)
                .map(|e| format!("{:.4}", stats.expert_step_losses[[e, final_step]]))
                .collect();
            println!(
                "iter {:>6}  mixed_loss={:.6}  expert_losses=[{}]  gate={:?}",
                iteration,
                stats.mixed_loss,
                expert_losses.join(", "),
                stats
                    .mean_gate_weights
                    .iter()
                    .map(|w| (w * 100.0).round() / 100.0)
                    .collect::<Vec<_>>()
            );
        }
    }

    // Held-out evaluation
    let eval_tasks = generator.sample_batch(20);
    let eval = trainer.evaluate(&eval_tasks)?;
    println!();
    println!("held-out mixed loss over 20 tasks: {:.6}", eval.mixed_loss);

    // Checkpoint every role's weights as one named mapping
    let file = File::create(&out_path)?;
    serde_json::to_writer(file, trainer.store())?;
    println!("saved weights to {out_path}");

    Ok(())
}

fn print_help() {
    println!("Meta-train a mixture of experts on sinusoid tasks");
    println!();
    println!("Options:");
    println!("  --experts, -n     number of experts (default 3)");
    println!("  --steps, -k       inner-loop gradient steps (default 5)");
    println!("  --inner-lr        inner-loop learning rate (default 0.01)");
    println!("  --meta-lr         outer Adam learning rate (default 0.001)");
    println!("  --iterations, -i  meta-training iterations (default 2000)");
    println!("  --batch, -b       meta-batch size (default 4)");
    println!("  --temp            gate softmax temperature (default 1.0)");
    println!("  --gate            learned | uniform | onehot (default learned)");
    println!("  --second-order    differentiate through the inner loop");
    println!("  --out, -o         weight checkpoint path (default weights.json)");
}
