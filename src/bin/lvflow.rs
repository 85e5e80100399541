use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lvflow::{
    equi8_correction, load_network, run_all_scenarios, run_calc, write_results, CalcOpt,
    CalcResult, LoadModel, Scenario,
};
use std::path::PathBuf;

/// Low-voltage radial network load flow.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load flow of a network
    Calc(CalcArgs),

    /// Standalone EQUI8 correction
    Equi8(Equi8Args),
}

#[derive(Args)]
struct CalcArgs {
    /// The network file (JSON)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scenario to compute.
    #[arg(long, conflicts_with = "all")]
    scenario: Option<Scenario>,

    /// Compute every scenario.
    #[arg(long, default_value_t = false)]
    all: bool,

    #[arg(long)]
    load_model: Option<LoadModel>,

    /// Share of load moved onto phase A (%).
    #[arg(long)]
    imbalance: Option<f64>,

    /// Load diversity (%).
    #[arg(long)]
    load_diversity: Option<f64>,

    /// Production diversity (%).
    #[arg(long)]
    production_diversity: Option<f64>,

    #[arg(long)]
    power_factor: Option<f64>,
}

#[derive(Args)]
struct Equi8Args {
    /// Phase A voltage (V).
    #[arg(long)]
    u1: f64,
    /// Phase B voltage (V).
    #[arg(long)]
    u2: f64,
    /// Phase C voltage (V).
    #[arg(long)]
    u3: f64,

    /// Phase path impedance (ohm).
    #[arg(long)]
    zph: f64,
    /// Neutral path impedance (ohm).
    #[arg(long)]
    zn: f64,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Calc(args) => calc(args),
        Commands::Equi8(args) => {
            let c = equi8_correction([args.u1, args.u2, args.u3], args.zph, args.zn)?;
            println!(
                "mean {:.2} V, spread {:.2} V -> {:.2} V, factor {:.4}, ratio {:.4}",
                c.mean_v,
                c.initial_spread_v,
                c.corrected_spread_v,
                c.correction_factor,
                c.impedance_ratio
            );
            println!(
                "corrected {:.2} / {:.2} / {:.2} V, I_N {:.2} A",
                c.corrected_voltages[0],
                c.corrected_voltages[1],
                c.corrected_voltages[2],
                c.neutral_current_a
            );
            if c.out_of_domain {
                println!("warning: impedances outside the EQUI8 domain");
            }
            Ok(())
        }
    }
}

fn calc(args: &CalcArgs) -> Result<()> {
    let network = load_network(&args.input)?;

    let mut opt = CalcOpt::default();
    if let Some(scenario) = args.scenario {
        opt.scenario = scenario;
    }
    if let Some(load_model) = args.load_model {
        opt.load_model = load_model;
    }
    if let Some(imbalance) = args.imbalance {
        opt.imbalance_percent = imbalance;
    }
    if let Some(diversity) = args.load_diversity {
        opt.load_diversity_percent = diversity;
    }
    if let Some(diversity) = args.production_diversity {
        opt.production_diversity_percent = diversity;
    }
    if let Some(pf) = args.power_factor {
        opt.power_factor = pf;
    }

    let results = if args.all {
        run_all_scenarios(&network, &opt)?
    } else {
        vec![run_calc(&network, &opt)?]
    };

    for result in &results {
        print_summary(result);
    }

    if let Some(out_path) = &args.output {
        write_results(out_path, &results)?;
    }

    Ok(())
}

fn print_summary(result: &CalcResult) {
    let circuit = match result.max_deviation_circuit {
        Some(n) => format!("circuit {}", n),
        None => "source".to_string(),
    };
    println!(
        "{:<12} {:<9} {:+7.2}% at {} ({}), losses {:.3} kW{}",
        format!("{:?}", result.scenario),
        format!("{:?}", result.compliance),
        result.max_deviation_percent,
        result.max_deviation_node.as_deref().unwrap_or("-"),
        circuit,
        result.total_losses_kw,
        if result.is_approximate() {
            " (approximate)"
        } else {
            ""
        }
    );
}
