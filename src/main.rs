use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;

use fiducial_vlam::map::{Map, MapInitMode, MapStyle, yaml};
use fiducial_vlam::msg::{MapMsg, ObservationsMsg};
use fiducial_vlam::solver::{GeometricSolver, SolverConfig, VlamDriver};
use fiducial_vlam::transform::TransformWithCovariance;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path of the YAML map file to load and periodically save.
    #[arg(long, default_value_t = String::from("fiducial_map.yaml"))]
    map_file: String,

    /// Map initialization mode: 0 = load the map file (fall back to mode 1 on
    /// failure), 1 = single fixed marker from the seed pose, 2 = seat the
    /// lowest marker id of the first frame at the seed camera pose.
    #[arg(long, default_value_t = 0)]
    map_init_mode: i32,

    /// Id of the fixed marker seeded in mode 1.
    #[arg(long, default_value_t = 0)]
    marker_id: i32,

    /// Physical side length of every marker, in meters.
    #[arg(long, default_value_t = 0.1)]
    marker_length: f64,

    /// Covariance fidelity persisted in the map file: 0 = pose, 1 =
    /// covariance, 2 = corners.
    #[arg(long, default_value_t = 1)]
    map_style: i32,

    /// Seed pose: the fixed marker's map pose in mode 1, the camera's map
    /// pose in mode 2. Translation in meters, Euler angles in radians.
    #[arg(long, default_value_t = 0.0)]
    seed_x: f64,
    #[arg(long, default_value_t = 0.0)]
    seed_y: f64,
    #[arg(long, default_value_t = 0.0)]
    seed_z: f64,
    #[arg(long, default_value_t = 0.0)]
    seed_roll: f64,
    #[arg(long, default_value_t = 0.0)]
    seed_pitch: f64,
    #[arg(long, default_value_t = 0.0)]
    seed_yaw: f64,

    /// Use the geometric backend only, skipping the factor graph.
    #[arg(long, default_value_t = false)]
    geometric: bool,

    /// Per-corner pixel standard deviation assumed for the detector.
    #[arg(long, default_value_t = 0.5)]
    corner_sigma: f64,

    /// Save the map and publish a map message every this many frames.
    #[arg(long, default_value_t = 30)]
    save_every: u32,
}

impl Args {
    fn seed_pose(&self) -> TransformWithCovariance {
        TransformWithCovariance::from_mean_and_covariance(
            &[
                self.seed_x,
                self.seed_y,
                self.seed_z,
                self.seed_roll,
                self.seed_pitch,
                self.seed_yaw,
            ],
            &[0.0; 36],
        )
    }

    fn map_style(&self) -> Result<MapStyle, Box<dyn Error>> {
        MapStyle::from_i32(self.map_style)
            .ok_or_else(|| format!("Unknown map style {}", self.map_style).into())
    }
}

/// Build the initial map, or `None` when construction is deferred to the
/// first observation batch (mode 2).
fn initial_map(args: &Args) -> Result<Option<Map>, Box<dyn Error>> {
    let mode = MapInitMode::from_i32(args.map_init_mode)
        .ok_or_else(|| format!("Unknown map init mode {}", args.map_init_mode))?;
    match mode {
        MapInitMode::LoadFromFile => match yaml::load_map(&PathBuf::from(&args.map_file)) {
            Ok(map) => {
                log::info!(
                    "Loaded map with {} markers from {}",
                    map.len(),
                    args.map_file
                );
                Ok(Some(map))
            }
            Err(e) => {
                log::warn!("{}. Starting from the seed marker instead.", e);
                Ok(Some(seed_marker_map(args)?))
            }
        },
        MapInitMode::FixedMarker => Ok(Some(seed_marker_map(args)?)),
        MapInitMode::FirstObservation => Ok(None),
    }
}

fn seed_marker_map(args: &Args) -> Result<Map, Box<dyn Error>> {
    log::info!(
        "Seeding map with fixed marker {} at ({}, {}, {})",
        args.marker_id,
        args.seed_x,
        args.seed_y,
        args.seed_z
    );
    Ok(Map::with_fixed_marker(
        args.map_style()?,
        args.marker_length,
        args.marker_id,
        args.seed_pose(),
    ))
}

/// Mode 2: seat the lowest observed marker id at the configured camera pose.
fn seed_map_from_frame(args: &Args, msg: &ObservationsMsg) -> Result<Option<Map>, Box<dyn Error>> {
    let observations = msg.to_observations();
    let Some(observation) = observations.iter().min_by_key(|obs| obs.id) else {
        return Ok(None);
    };
    let camera_info = msg.camera_info.to_camera_info();
    let t_camera_marker = GeometricSolver::new().solve_t_camera_marker(
        &camera_info,
        observation,
        args.marker_length,
    );
    if !t_camera_marker.is_valid() {
        log::warn!("Cannot solve the seed marker's pose yet; waiting for the next frame.");
        return Ok(None);
    }
    let t_map_marker = args.seed_pose().compose(&t_camera_marker);
    log::info!("Seeding map with fixed marker {} from the first frame", observation.id);
    Ok(Some(Map::with_fixed_marker(
        args.map_style()?,
        args.marker_length,
        observation.id,
        t_map_marker,
    )))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = Args::parse();

    let driver = VlamDriver::new(SolverConfig {
        use_factor_graph: !args.geometric,
        corner_sigma: args.corner_sigma,
        ..SolverConfig::default()
    });
    let mut map = initial_map(&args)?;
    let map_path = PathBuf::from(&args.map_file);

    let mut frame_count = 0u32;
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let msg: ObservationsMsg = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping malformed observations message: {}", e);
                continue;
            }
        };

        if map.is_none() {
            map = seed_map_from_frame(&args, &msg)?;
        }
        let Some(map) = map.as_mut() else { continue };

        let camera_info = msg.camera_info.to_camera_info();
        let observations = msg.to_observations();
        let t_map_camera = driver.localize(&camera_info, &observations, map);
        match t_map_camera.mean() {
            Some(mean) => log::info!(
                "t_map_camera: xyz ({:.4}, {:.4}, {:.4}) rpy ({:.4}, {:.4}, {:.4})",
                mean[0],
                mean[1],
                mean[2],
                mean[3],
                mean[4],
                mean[5]
            ),
            None => log::info!("No known marker in sight."),
        }
        driver.update_map(&t_map_camera, &camera_info, &observations, map);

        frame_count += 1;
        if frame_count % args.save_every == 0 {
            yaml::save_map(map, &map_path)?;
            println!("{}", serde_json::to_string(&MapMsg::from_map(msg.time, map))?);
            log::info!("Saved {} markers to {}", map.len(), args.map_file);
        }
    }

    if let Some(map) = &map {
        yaml::save_map(map, &map_path)?;
    }
    Ok(())
}
