// Demonstration: train MAPPO on the scripted lane environment, then evaluate
// the latest checkpoint.
//
// Build/run from this repo root:
//   cargo run --features nn --example lane_change_training -- --episodes 60 --model-dir models

#[cfg(feature = "nn")]
fn main() {
    use std::env;
    use std::path::PathBuf;

    use cavmarl::{
        run_evaluation, run_training, CheckpointSelector, MappoConfig, MappoLearner, RunConfig,
        ScriptedEnvironment, TrafficDensity,
    };
    use tch::Device;

    init_logging();

    let args: Vec<String> = env::args().collect();
    let episodes: u64 = arg_value(&args, "--episodes")
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let agents: usize = arg_value(&args, "--agents")
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);
    let seed: u64 = arg_value(&args, "--seed")
        .and_then(|s| s.parse().ok())
        .unwrap_or(42);
    let model_dir = PathBuf::from(arg_value(&args, "--model-dir").unwrap_or("models"));

    let config = MappoConfig {
        state_dim: 25,
        action_dim: 2,
        roll_out_n_steps: 20,
        batch_size: 16,
        episodes_before_train: 5,
        test_seeds: vec![0, 25, 50],
        traffic_density: TrafficDensity::Low,
        seed: Some(seed),
        ..MappoConfig::default()
    };
    let run = RunConfig {
        max_episodes: episodes,
        eval_interval: 10,
        eval_episodes: 3,
        resume: true,
    };

    let env = ScriptedEnvironment::new(agents, config.state_dim, 40)
        .with_rewards(vec![20.0, 10.0, 15.0])
        .with_agent_schedule(vec![agents, agents.saturating_sub(1).max(1)]);
    let mut eval_env = ScriptedEnvironment::new(agents, config.state_dim, 40);

    let mut learner = match MappoLearner::new(env, config, Device::cuda_if_available()) {
        Ok(learner) => learner,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    match run_training(&mut learner, &mut eval_env, &run, &model_dir) {
        Ok(curve) => {
            for (episode, reward) in curve {
                println!("Episode {:>5}  mean eval reward {:>8.2}", episode, reward);
            }
        }
        Err(e) => {
            eprintln!("Training failed: {}", e);
            std::process::exit(1);
        }
    }

    match run_evaluation(&mut learner, &mut eval_env, &model_dir, CheckpointSelector::Latest) {
        Ok(Some(stats)) => println!("{}", stats),
        Ok(None) => eprintln!("No checkpoint in {}", model_dir.display()),
        Err(e) => {
            eprintln!("Evaluation failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(not(feature = "nn"))]
fn main() {
    eprintln!(
        "This example requires the 'nn' feature.\n\
Run:\n\
  cargo run --features nn --example lane_change_training -- --episodes 60"
    );
}

#[cfg(feature = "nn")]
fn init_logging() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cavmarl=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

#[cfg(feature = "nn")]
fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
