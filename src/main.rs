use clap::{Args, Parser, ValueEnum};
use cryptotrader::backtest::*;
use cryptotrader::data;
use cryptotrader::engine::*;
use cryptotrader::evaluation::{periods_per_year, EpisodeMetrics};
use cryptotrader::optimize::{fit, FitConfig, FitOutcome, ParamSet, SolverKind};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cryptotrader", about = "Indicator-driven crypto portfolio agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Replay an agent over historical candles
    Backtest {
        #[command(flatten)]
        market: MarketArgs,
        #[command(flatten)]
        agent: AgentArgs,
        /// Step cap (defaults to the whole series)
        #[arg(long)]
        max_steps: Option<usize>,
        /// Print the portfolio after every step
        #[arg(long)]
        visualize: bool,
    },
    /// Search indicator parameters, then backtest the best set
    Fit {
        #[command(flatten)]
        market: MarketArgs,
        #[command(flatten)]
        agent: AgentArgs,
        #[arg(long, default_value = "100")]
        num_evals: usize,
        #[arg(long, default_value = "pso")]
        solver: SolverKind,
        #[arg(long, default_value = "10")]
        num_particles: usize,
        /// Step cap per evaluation
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Trade on a paced replay of the candles
    Trade {
        #[command(flatten)]
        market: MarketArgs,
        #[command(flatten)]
        agent: AgentArgs,
        /// Bars between samples of the observation window
        #[arg(long, default_value = "1")]
        frequency: usize,
        /// Milliseconds per pacing unit (1000 = real time)
        #[arg(long, default_value = "1000")]
        time_unit_ms: u64,
        #[arg(long)]
        render: bool,
    },
}

#[derive(Args)]
struct MarketArgs {
    /// Candle source as SYMBOL=path.csv, repeatable
    #[arg(short, long = "data", required = true, value_parser = data::parse_source)]
    sources: Vec<(cryptotrader::domain::Symbol, String)>,
    #[arg(long, default_value = "50")]
    obs_steps: usize,
    #[arg(long, default_value = "0.0025")]
    fee: f64,
    #[arg(long, default_value = "10000")]
    funds: f64,
}

#[derive(Clone, Copy, ValueEnum)]
enum AgentKind {
    Dummy,
    Equal,
    Momentum,
    Mesa,
}

#[derive(Args)]
struct AgentArgs {
    #[arg(short, long, value_enum, default_value = "momentum")]
    agent: AgentKind,
    /// Moving average of the momentum agent: simple, exp or kama
    #[arg(long, default_value = "kama")]
    mean_type: MeanKind,
    #[arg(long, default_value = "42")]
    seed: u64,
    #[arg(long)]
    ma1: Option<f64>,
    #[arg(long)]
    ma2: Option<f64>,
    #[arg(long)]
    std_span: Option<f64>,
    #[arg(long)]
    std_weight_down: Option<f64>,
    #[arg(long)]
    std_weight_up: Option<f64>,
    #[arg(long)]
    fast_limit: Option<f64>,
    #[arg(long)]
    slow_limit: Option<f64>,
}

impl AgentArgs {
    fn param_set(&self) -> ParamSet {
        [
            ("ma1", self.ma1),
            ("ma2", self.ma2),
            ("std_span", self.std_span),
            ("std_weight_down", self.std_weight_down),
            ("std_weight_up", self.std_weight_up),
            ("fast_limit", self.fast_limit),
            ("slow_limit", self.slow_limit),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
    }

    fn tunable(&self) -> Option<Box<dyn Tunable>> {
        match self.agent {
            AgentKind::Momentum => Some(Box::new(MomentumTrader::new(self.mean_type))),
            AgentKind::Mesa => Some(Box::new(MesaMomentumTrader::new())),
            AgentKind::Dummy | AgentKind::Equal => None,
        }
    }

    /// Agent ready to act. Indicator agents get the flag parameters when any
    /// are given and stay unfitted otherwise.
    fn build(&self) -> Result<Box<dyn Agent>, Box<dyn std::error::Error>> {
        match self.agent {
            AgentKind::Dummy => Ok(Box::new(DummyTrader::new(self.seed))),
            AgentKind::Equal => Ok(Box::new(EqualWeightTrader::new())),
            AgentKind::Momentum => {
                let mut agent = MomentumTrader::new(self.mean_type);
                self.install(&mut agent)?;
                Ok(Box::new(agent))
            }
            AgentKind::Mesa => {
                let mut agent = MesaMomentumTrader::new();
                self.install(&mut agent)?;
                Ok(Box::new(agent))
            }
        }
    }

    fn install(&self, agent: &mut dyn Tunable) -> Result<(), Box<dyn std::error::Error>> {
        let params = self.param_set();
        if !params.is_empty() {
            agent.set_params(&params)?;
        }
        Ok(())
    }
}

struct Market {
    env: MarketEnv,
    periods_per_year: f64,
}

fn load_market(args: &MarketArgs) -> Result<Market, Box<dyn std::error::Error>> {
    let series = data::load_series(&args.sources)?;
    let interval = series
        .first()
        .and_then(|(_, candles)| data::bar_interval_ms(candles))
        .unwrap_or(86_400_000);
    let config = MarketConfig {
        obs_steps: args.obs_steps,
        fee: args.fee,
        initial_funds: args.funds,
    };
    Ok(Market {
        env: MarketEnv::new(series, config)?,
        periods_per_year: periods_per_year(interval),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let interrupt = Interrupt::new();
    tokio::spawn(interrupt.clone().listen_ctrl_c());

    match cli.command {
        Commands::Backtest {
            market,
            agent,
            max_steps,
            visualize,
        } => {
            let mut market = load_market(&market)?;
            let mut agent = agent.build()?;
            let options = BacktestOptions {
                max_steps,
                verbose: true,
                visualize,
            };
            run_backtest(agent.as_mut(), &mut market, &options, &interrupt)?;
        }
        Commands::Fit {
            market,
            agent,
            num_evals,
            solver,
            num_particles,
            max_steps,
        } => {
            let mut market = load_market(&market)?;
            let mut tunable = agent
                .tunable()
                .ok_or("only the momentum and mesa agents have parameters to fit")?;
            let config = FitConfig {
                num_evals,
                solver,
                num_particles,
                seed: agent.seed,
                max_episode_steps: max_steps,
                verbose: true,
            };
            run_fit(tunable.as_mut(), &mut market, &config, &interrupt)?;
        }
        Commands::Trade {
            market,
            agent,
            frequency,
            time_unit_ms,
            render,
        } => {
            let mut market = load_market(&market)?;
            let mut agent = agent.build()?;
            let options = TradeOptions {
                frequency,
                obs_steps: market.env.obs_steps(),
                time_unit: Duration::from_millis(time_unit_ms),
                verbose: true,
                render,
            };
            run_trade(agent.as_mut(), &mut market, &options, &interrupt).await?;
        }
    }

    Ok(())
}

fn run_backtest<A: Agent + ?Sized>(
    agent: &mut A,
    market: &mut Market,
    options: &BacktestOptions,
    interrupt: &Interrupt,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("BACKTEST: {} on {:?}", agent.name(), market.env.symbols());
    println!(
        "{} bars, window {}, fee {:.4}",
        market.env.data_len(),
        market.env.obs_steps(),
        market.env.config().fee
    );
    println!("{}", "=".repeat(70));

    let report = backtest(agent, &mut market.env, options, interrupt)?;
    let metrics = EpisodeMetrics::from_equity(market.env.equity_curve(), market.periods_per_year)
        .with_records(market.env.records());

    println!("\n{}", "=".repeat(70));
    println!("RESULT: {} ({} / {} steps)", report.termination, report.steps, report.max_steps);
    println!("{}", "=".repeat(70));
    println!("  Log reward:       {:>12.6}", report.reward);
    println!("  Final value:      {:>12.2}", metrics.final_value);
    println!("  Total return:     {:>11.2}%", metrics.total_return_pct);
    println!("  Annualized:       {:>11.2}%", metrics.annualized_return_pct);
    println!("  Sharpe:           {:>12.3}", metrics.sharpe_ratio);
    println!("  Sortino:          {:>12.3}", metrics.sortino_ratio);
    println!("  Max drawdown:     {:>11.2}%", metrics.max_drawdown_pct);
    println!("  Calmar:           {:>12.3}", metrics.calmar_ratio);
    println!("  Rebalances:       {:>12}", metrics.rebalances);
    println!("  Avg turnover:     {:>12.4}", metrics.avg_turnover);
    println!("  Fees paid:        {:>12.2}", metrics.total_fees);
    Ok(())
}

fn run_fit(
    agent: &mut dyn Tunable,
    market: &mut Market,
    config: &FitConfig,
    interrupt: &Interrupt,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!(
        "FIT: {} with {:?}, {} evaluations",
        agent.name(),
        config.solver,
        config.num_evals
    );
    println!("{}", "=".repeat(70));

    match fit(&mut *agent, &mut market.env, config, interrupt)? {
        FitOutcome::Completed { params, info } => {
            println!("\nBest parameters:");
            println!("{}", serde_json::to_string_pretty(&params)?);
            println!("Search info:");
            println!("{}", serde_json::to_string_pretty(&info)?);

            let options = BacktestOptions {
                max_steps: None,
                verbose: false,
                visualize: false,
            };
            run_backtest(&mut *agent, market, &options, interrupt)?;
        }
        FitOutcome::Interrupted { evaluations } => {
            println!("\nSearch interrupted after {} evaluations", evaluations);
        }
    }
    Ok(())
}

async fn run_trade(
    agent: &mut dyn Agent,
    market: &mut Market,
    options: &TradeOptions,
    interrupt: &Interrupt,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!(
        "LIVE REPLAY: {} on {:?}, pacing {:.1}s",
        agent.name(),
        market.env.symbols(),
        options.pacing().as_secs_f64()
    );
    println!("{}", "=".repeat(70));

    market.env.reset(ResetScope::full())?;
    let report = trade(agent, &mut market.env, options, interrupt).await?;

    println!("\n{}", "=".repeat(70));
    println!("STOPPED: {}", report.termination);
    println!("{}", "=".repeat(70));
    println!("  Steps:            {:>12}", report.steps);
    println!("  Actions:          {:>12}", report.actions);
    println!("  Log reward:       {:>12.6}", report.reward);
    println!("  Uptime:           {:>11.1}s", report.uptime.as_secs_f64());
    println!("  Final value:      {:>12.2}", market.env.portfolio_value());
    Ok(())
}
