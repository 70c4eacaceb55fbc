//! Geomagnetic Field CLI
//!
//! Field vectors, frame conversions, field-line traces and adiabatic
//! coordinates for single positions. Results are written to stdout as JSON.
//!
//! Usage:
//!   geomag --config model.json field --time 2020-01-01T00:00:00Z 0 0 6600
//!   geomag convert --mjd 58849.0 --from GEOinKM --to GSMinRE 7000 0 0
//!   geomag invariants --time 2020-03-20T12:00:00Z --pitch 90,60,30 20000 0 0
//!   geomag coords --surrogate-dir db/ --pitch 90,45 --coord-sys GSMinRE 4 0 0

use adiabatic_coords::{CoordinateModel, SurrogateLimits, SurrogateStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use geomag_field::{
    CoordSys, ExternalFieldKind, FieldModelConfig, MagField, MainFieldKind, Position, ShellMode,
    TimeValue, TraceDirection,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "geomag", about = "Geomagnetic field, coordinate and invariant queries")]
struct Cli {
    /// Field model configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Main field model (igrf, fastigrf, offsetdipole, tilteddipole)
    #[arg(long, global = true)]
    main_field: Option<MainFieldKind>,

    /// External field model (none, op77, t89)
    #[arg(long, global = true)]
    external_field: Option<ExternalFieldKind>,

    /// Kp index for the external field
    #[arg(long, global = true)]
    kp: Option<f64>,

    /// Shell parameter (dipole, mcilwain)
    #[arg(long, global = true)]
    shell: Option<ShellMode>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct When {
    /// UTC time, RFC 3339
    #[arg(short, long, conflicts_with = "mjd")]
    time: Option<DateTime<Utc>>,

    /// Modified Julian date
    #[arg(long)]
    mjd: Option<f64>,
}

impl When {
    fn resolve(&self) -> TimeValue {
        match (self.time, self.mjd) {
            (Some(t), _) => TimeValue::from_datetime(t),
            (None, Some(mjd)) => TimeValue::from_mjd(mjd),
            (None, None) => TimeValue::from_datetime(Utc::now()),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct Where {
    /// Input coordinate system, e.g. GEOinKM, GSMinRE, GDZinKM
    #[arg(long, default_value = "GEOinKM")]
    coord_sys: CoordSys,

    /// Three coordinates in the input system
    #[arg(num_args = 3, value_names = ["C1", "C2", "C3"], allow_negative_numbers = true)]
    coords: Vec<f64>,
}

impl Where {
    fn position(&self) -> Position {
        Position::new(self.coord_sys, self.coords[0], self.coords[1], self.coords[2])
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Main plus external field vector
    Field {
        #[command(flatten)]
        when: When,
        #[command(flatten)]
        at: Where,
    },
    /// Convert a position between coordinate systems
    Convert {
        #[command(flatten)]
        when: When,
        #[arg(long)]
        from: CoordSys,
        #[arg(long)]
        to: CoordSys,
        #[arg(num_args = 3, value_names = ["C1", "C2", "C3"], allow_negative_numbers = true)]
        coords: Vec<f64>,
    },
    /// Trace the field line through a point
    Trace {
        #[command(flatten)]
        when: When,
        #[command(flatten)]
        at: Where,
        /// north, south, both, equator
        #[arg(long)]
        direction: Option<TraceDirection>,
        /// Print only footprints and Bmin, not the points
        #[arg(long)]
        summary: bool,
    },
    /// Lm, I, K and Bmirror per pitch angle
    Invariants {
        #[command(flatten)]
        when: When,
        #[command(flatten)]
        at: Where,
        /// Equatorial pitch angles, degrees
        #[arg(long, value_delimiter = ',', default_value = "90")]
        pitch: Vec<f64>,
    },
    /// Alpha, Lm, K, Phi, Hmin and L* per pitch angle
    Coords {
        #[command(flatten)]
        when: When,
        #[command(flatten)]
        at: Where,
        #[arg(long, value_delimiter = ',', default_value = "90")]
        pitch: Vec<f64>,
        /// Directory of surrogate tables (fast_phi.json, fast_hmin.json)
        #[arg(long)]
        surrogate_dir: Option<PathBuf>,
        /// Output limits (JSON)
        #[arg(long)]
        limits: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct TraceSummary {
    status: geomag_field::TraceStatus,
    points: usize,
    bmin: f64,
    bmin_position: [f64; 3],
    north_footprint: Option<[f64; 3]>,
    south_footprint: Option<[f64; 3]>,
    shabansky: bool,
}

fn load_config(cli: &Cli) -> Result<FieldModelConfig> {
    let mut config = match &cli.config {
        Some(path) => FieldModelConfig::from_json_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => FieldModelConfig::default(),
    };
    if let Some(main) = cli.main_field {
        config.main_field = main;
    }
    if let Some(external) = cli.external_field {
        config.external_field = external;
    }
    if let Some(shell) = cli.shell {
        config.shell_mode = shell;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_config(&cli)?;
    if let Command::Trace {
        direction: Some(d), ..
    } = &cli.command
    {
        config.trace_direction = *d;
    }
    debug!("Configuration: {:?}", config);
    let mut field = MagField::new(config)?;
    if let Some(kp) = cli.kp {
        field.set_kp_value(kp)?;
    }

    match &cli.command {
        Command::Field { when, at } => {
            let b = field.compute_bfield(&when.resolve(), &at.position())?;
            print_json(&b)?;
        }
        Command::Convert {
            when,
            from,
            to,
            coords,
        } => {
            let out = field.convert(&when.resolve(), *from, *to, [coords[0], coords[1], coords[2]])?;
            print_json(&Position::new(*to, out[0], out[1], out[2]))?;
        }
        Command::Trace {
            when, at, summary, ..
        } => {
            let line = field.compute_field_line(&when.resolve(), &at.position())?;
            info!("Traced {} points, {:?}", line.points.len(), line.status);
            if *summary {
                print_json(&TraceSummary {
                    status: line.status,
                    points: line.points.len(),
                    bmin: line.bmin,
                    bmin_position: line.bmin_position.into(),
                    north_footprint: line.north_footprint.map(Into::into),
                    south_footprint: line.south_footprint.map(Into::into),
                    shabansky: line.shabansky,
                })?;
            } else {
                print_json(&line)?;
            }
        }
        Command::Invariants { when, at, pitch } => {
            let set = field.compute_ad_invariants(&when.resolve(), &at.position(), pitch)?;
            print_json(&set)?;
        }
        Command::Coords {
            when,
            at,
            pitch,
            surrogate_dir,
            limits,
        } => {
            let limits: SurrogateLimits = match limits {
                Some(path) => serde_json::from_str(
                    &std::fs::read_to_string(path)
                        .with_context(|| format!("reading limits {}", path.display()))?,
                )?,
                None => SurrogateLimits::default(),
            };
            let store = match surrogate_dir {
                Some(dir) => SurrogateStore::from_dir(dir)
                    .with_context(|| format!("loading surrogate tables from {}", dir.display()))?,
                None => SurrogateStore::new(),
            };
            let mut model = CoordinateModel::from_store(field, &store, limits)?;
            let sets = model.compute_coordinate_set(&[when.resolve()], &[at.position()], pitch)?;
            print_json(&sets)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert() {
        let cli = Cli::try_parse_from([
            "geomag", "convert", "--mjd", "58849.5", "--from", "GEOinKM", "--to", "gsminre",
            "7000", "-150.5", "0",
        ])
        .unwrap();
        match cli.command {
            Command::Convert {
                when, from, to, coords,
            } => {
                assert_eq!(when.mjd, Some(58849.5));
                assert_eq!(from, CoordSys::GeoInKm);
                assert_eq!(to, CoordSys::GsmInRe);
                assert_eq!(coords, vec![7000.0, -150.5, 0.0]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_model_overrides() {
        let cli = Cli::try_parse_from([
            "geomag", "invariants", "--pitch", "90,45", "--main-field", "tilteddipole",
            "--shell", "dipole", "20000", "0", "0",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.main_field, MainFieldKind::TiltedDipole);
        assert_eq!(config.shell_mode, ShellMode::Dipole);
        match cli.command {
            Command::Invariants { pitch, at, .. } => {
                assert_eq!(pitch, vec![90.0, 45.0]);
                assert_eq!(at.position().sys, CoordSys::GeoInKm);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_time_and_mjd_conflict() {
        let result = Cli::try_parse_from([
            "geomag", "field", "--time", "2020-01-01T00:00:00Z", "--mjd", "58849", "0", "0", "6600",
        ]);
        assert!(result.is_err());
    }
}
