use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use deepfracture::field::read_field;
use deepfracture::fracture::{FractureRequest, SegmentParams};
use deepfracture::mesh::read_obj;
use deepfracture::runtime::ImpactScript;
use deepfracture::{
    DebugControlState, Fidelity, FieldToFragments, FracturePredictor, ModelRegistry, NeuralFracturePredictor,
    SceneConfig, ShapeId,
};

#[derive(Parser)]
#[command(name = "deepfracture")]
#[command(version)]
#[command(about = "Learned fracture prediction for rigid body scenes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a scene, fracturing objects on strong impacts
    Run {
        /// Scene description (JSON)
        scene: PathBuf,
        /// Initial states (`;`-separated, one line per object)
        #[arg(long)]
        states: Option<PathBuf>,
        /// Override the number of steps
        #[arg(long)]
        steps: Option<u64>,
        /// Export per-step meshes to this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Predict fragments for the strongest impact of a recorded script
    Predict {
        /// Directory holding `{shape}/{shape}-{encoder,decoder}.json`
        #[arg(long)]
        model_dir: PathBuf,
        #[arg(long)]
        shape: String,
        /// Impact script (JSON)
        #[arg(long)]
        script: PathBuf,
        /// Original surface (OBJ, object space)
        #[arg(long)]
        surface: PathBuf,
        /// Output directory for `imj.nii` and `objs/vol_{n}.obj`
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "mid")]
        fidelity: Fidelity,
        /// Field normalisation of the isolevel bias
        #[arg(long, default_value = "1.0")]
        max_value: f32,
        #[arg(long, default_value = "1")]
        collision_num: usize,
        #[arg(long, default_value = "10000")]
        impulse_max: f32,
    },

    /// Split a saved field (NIfTI) into fragments
    Segment {
        /// Field volume (.nii)
        field: PathBuf,
        /// Original surface (OBJ, object space)
        #[arg(long)]
        surface: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "mid")]
        fidelity: Fidelity,
        /// Field normalisation of the isolevel bias (default: field maximum)
        #[arg(long)]
        max_value: Option<f32>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scene,
            states,
            steps,
            export_dir,
        } => cmd_run(&scene, states.as_deref(), steps, export_dir),
        Commands::Predict {
            model_dir,
            shape,
            script,
            surface,
            output,
            fidelity,
            max_value,
            collision_num,
            impulse_max,
        } => {
            let shape = ShapeId::new(shape);
            let registry = ModelRegistry::load(&model_dir, [&shape])
                .with_context(|| format!("Failed to load model `{}` from {}", shape, model_dir.display()))?;
            let script = ImpactScript::load(&script).context("Failed to load impact script")?;
            let Some(encoding) = script.encoding(collision_num, impulse_max) else {
                bail!("impact script is empty");
            };
            let surface = read_obj(&surface)
                .with_context(|| format!("Failed to read surface {}", surface.display()))?;

            let predictor = NeuralFracturePredictor::new(Arc::new(registry), FieldToFragments::default());
            let request = FractureRequest {
                object: shape.as_str(),
                encoding: &encoding,
                surface: &surface,
                shape: Some(&shape),
                fidelity,
                max_value,
                work_dir: Some(output.clone()),
            };
            let fragments = predictor.predict(&request).context("Fracture prediction failed")?;
            log::info!("{} fragments written to {}", fragments.len(), output.join("objs").display());
            Ok(())
        }
        Commands::Segment {
            field,
            surface,
            output,
            fidelity,
            max_value,
        } => {
            let field_data =
                read_field(&field).with_context(|| format!("Failed to read field {}", field.display()))?;
            let surface = read_obj(&surface)
                .with_context(|| format!("Failed to read surface {}", surface.display()))?;
            let params = SegmentParams::for_fidelity(fidelity, max_value.unwrap_or_else(|| field_data.max_value()));
            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;

            let fragments = FieldToFragments::default()
                .segment(&field_data, &surface, &params, Some(&output))
                .context("Segmentation failed")?;
            log::info!("{} fragments written to {}", fragments.len(), output.join("objs").display());
            Ok(())
        }
    }
}

fn cmd_run(
    scene_path: &Path,
    states: Option<&Path>,
    steps: Option<u64>,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut scene = SceneConfig::load(scene_path)
        .with_context(|| format!("Failed to load scene {}", scene_path.display()))?;
    if let Some(states) = states {
        let applied = scene
            .apply_initial_states(states)
            .with_context(|| format!("Failed to apply initial states {}", states.display()))?;
        log::info!("Applied {} initial states", applied);
    }
    if let Some(steps) = steps {
        scene.world.steps = steps;
    }
    if let Some(dir) = export_dir {
        // Relative to the working directory, not the scene file.
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };
        scene.world.export_dir = Some(dir);
    }

    let mut runtime = scene.build()?;
    let mut debug = DebugControlState::new();
    let summary = runtime.run(&mut debug).context("Simulation aborted")?;

    log::info!(
        "Ran {} steps: {} fractures, {} meshes exported",
        summary.steps,
        summary.fracture_events,
        summary.files_exported
    );
    for object in runtime.orchestrator().objects() {
        log::info!("  {}: {:?}", object.name(), object.state());
    }
    Ok(())
}
