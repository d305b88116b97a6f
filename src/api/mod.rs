use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::core::{
    BatchResult, BatchSummary, CautionBudget, ConfigurationError, PitPolicy, RefuelBound,
    SimulationError, SimulationParameters, TrialRow, TrialTraces, run_batch,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliRefuelBound {
    LapsRemaining,
    Ceiling,
}

impl From<CliRefuelBound> for RefuelBound {
    fn from(value: CliRefuelBound) -> Self {
        match value {
            CliRefuelBound::LapsRemaining => RefuelBound::LapsRemaining,
            CliRefuelBound::Ceiling => RefuelBound::Ceiling,
        }
    }
}

impl From<RefuelBound> for CliRefuelBound {
    fn from(value: RefuelBound) -> Self {
        match value {
            RefuelBound::LapsRemaining => CliRefuelBound::LapsRemaining,
            RefuelBound::Ceiling => CliRefuelBound::Ceiling,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCautionBudget {
    EntryAndPit,
    PitOnly,
}

impl From<CliCautionBudget> for CautionBudget {
    fn from(value: CliCautionBudget) -> Self {
        match value {
            CliCautionBudget::EntryAndPit => CautionBudget::EntryAndPit,
            CliCautionBudget::PitOnly => CautionBudget::PitOnly,
        }
    }
}

impl From<CautionBudget> for CliCautionBudget {
    fn from(value: CautionBudget) -> Self {
        match value {
            CautionBudget::EntryAndPit => CliCautionBudget::EntryAndPit,
            CautionBudget::PitOnly => CliCautionBudget::PitOnly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRefuelBound {
    #[serde(alias = "lapsRemaining", alias = "laps_remaining")]
    LapsRemaining,
    Ceiling,
}

impl From<ApiRefuelBound> for CliRefuelBound {
    fn from(value: ApiRefuelBound) -> Self {
        match value {
            ApiRefuelBound::LapsRemaining => CliRefuelBound::LapsRemaining,
            ApiRefuelBound::Ceiling => CliRefuelBound::Ceiling,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCautionBudget {
    #[serde(alias = "entryAndPit", alias = "entry_and_pit")]
    EntryAndPit,
    #[serde(alias = "pitOnly", alias = "pit_only")]
    PitOnly,
}

impl From<ApiCautionBudget> for CliCautionBudget {
    fn from(value: ApiCautionBudget) -> Self {
        match value {
            ApiCautionBudget::EntryAndPit => CliCautionBudget::EntryAndPit,
            ApiCautionBudget::PitOnly => CliCautionBudget::PitOnly,
        }
    }
}

/// Named pit policies accepted by the API in place of the two individual knobs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPitPolicy {
    #[serde(alias = "positionAware", alias = "position_aware")]
    PositionAware,
    #[serde(alias = "fixedCeiling", alias = "fixed_ceiling")]
    FixedCeiling,
    #[serde(alias = "correctedBudget", alias = "corrected_budget")]
    CorrectedBudget,
}

impl From<ApiPitPolicy> for PitPolicy {
    fn from(value: ApiPitPolicy) -> Self {
        match value {
            ApiPitPolicy::PositionAware => PitPolicy::POSITION_AWARE,
            ApiPitPolicy::FixedCeiling => PitPolicy::FIXED_CEILING,
            ApiPitPolicy::CorrectedBudget => PitPolicy::CORRECTED_BUDGET,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    max_fuel: Option<f64>,
    fuel_usage_green: Option<f64>,
    fuel_usage_caution: Option<f64>,
    pit_speed_kph: Option<f64>,
    avg_lap_time: Option<f64>,
    circuit_length_km: Option<f64>,
    pitlane_length_km: Option<f64>,
    refuel_rate: Option<f64>,
    pit_overhead: Option<f64>,
    partial_refuel_ceiling: Option<f64>,

    caution_count: Option<u32>,
    caution_min_minutes: Option<f64>,
    caution_max_minutes: Option<f64>,
    caution_first_lap: Option<u32>,
    caution_last_lap: Option<u32>,

    race_time_cutoff: Option<f64>,
    trials: Option<u32>,
    seed: Option<u64>,
    parallel: Option<bool>,

    pit_policy: Option<ApiPitPolicy>,
    refuel_bound: Option<ApiRefuelBound>,
    caution_budget: Option<ApiCautionBudget>,

    trace_trial: Option<u32>,
}

#[derive(Parser, Debug, PartialEq)]
#[command(
    name = "pitwall",
    bin_name = "pitwall simulate",
    about = "Monte Carlo comparison of full vs partial refuelling under Code 60 cautions"
)]
struct Cli {
    #[arg(long, default_value_t = 110.0, help = "Tank capacity in liters")]
    max_fuel: f64,
    #[arg(long, default_value_t = 3.2, help = "Fuel burned per green lap in liters")]
    fuel_usage_green: f64,
    #[arg(long, default_value_t = 1.4, help = "Fuel burned per Code 60 lap in liters")]
    fuel_usage_caution: f64,
    #[arg(long, default_value_t = 40.0, help = "Pit lane speed limit in km/h")]
    pit_speed_kph: f64,
    #[arg(long, default_value_t = 145.0, help = "Average green lap time in seconds")]
    avg_lap_time: f64,
    #[arg(long, default_value_t = 7.004)]
    circuit_length_km: f64,
    #[arg(long, default_value_t = 1.0)]
    pitlane_length_km: f64,
    #[arg(long, default_value_t = 1.875, help = "Seconds needed per liter refuelled")]
    refuel_rate: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Fixed seconds added to every stop on top of refuelling"
    )]
    pit_overhead: f64,
    #[arg(
        long,
        default_value_t = 90.0,
        help = "Fuel level the partial strategy refuels to at a low-fuel stop"
    )]
    partial_refuel_ceiling: f64,
    #[arg(long, default_value_t = 14, help = "Code 60 periods per race")]
    caution_count: u32,
    #[arg(long, default_value_t = 5.0)]
    caution_min_minutes: f64,
    #[arg(long, default_value_t = 20.0)]
    caution_max_minutes: f64,
    #[arg(
        long,
        default_value_t = 10,
        help = "First lap that can be neutralised (inclusive)"
    )]
    caution_first_lap: u32,
    #[arg(
        long,
        default_value_t = 270,
        help = "Lap after the last one that can be neutralised (exclusive)"
    )]
    caution_last_lap: u32,
    #[arg(long, default_value_t = 43_200.0, help = "Race length in seconds")]
    race_time_cutoff: f64,
    #[arg(long, default_value_t = 100)]
    trials: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = CliRefuelBound::LapsRemaining)]
    refuel_bound: CliRefuelBound,
    #[arg(long, value_enum, default_value_t = CliCautionBudget::EntryAndPit)]
    caution_budget: CliCautionBudget,
    #[arg(long, help = "Run trials on all cores")]
    parallel: bool,
    #[arg(long, help = "Print the full result as JSON")]
    json: bool,
    #[arg(long, help = "Also print the lap-by-lap comparison for this trial")]
    trace_trial: Option<u32>,
}

#[derive(Copy, Clone, Debug)]
struct ApiOptions {
    trace_trial: Option<u32>,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParameters,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrialTraceResponse {
    trial: u32,
    gap_per_lap: Vec<f64>,
    #[serde(flatten)]
    traces: TrialTraces,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    seed: u64,
    pit_policy: PitPolicy,
    summary: BatchSummary,
    results: Vec<TrialRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trial_trace: Option<TrialTraceResponse>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn build_params(cli: Cli) -> Result<SimulationParameters, String> {
    let params = SimulationParameters {
        max_fuel: cli.max_fuel,
        fuel_usage_green: cli.fuel_usage_green,
        fuel_usage_caution: cli.fuel_usage_caution,
        pit_speed_kph: cli.pit_speed_kph,
        avg_lap_time: cli.avg_lap_time,
        circuit_length_km: cli.circuit_length_km,
        pitlane_length_km: cli.pitlane_length_km,
        refuel_rate: cli.refuel_rate,
        pit_overhead: cli.pit_overhead,
        partial_refuel_ceiling: cli.partial_refuel_ceiling,
        caution_count: cli.caution_count,
        caution_min_minutes: cli.caution_min_minutes,
        caution_max_minutes: cli.caution_max_minutes,
        caution_first_lap: cli.caution_first_lap,
        caution_last_lap: cli.caution_last_lap,
        race_time_cutoff: cli.race_time_cutoff,
        trials: cli.trials,
        seed: cli.seed,
        pit_policy: PitPolicy {
            refuel_bound: cli.refuel_bound.into(),
            caution_budget: cli.caution_budget.into(),
        },
        parallel: cli.parallel,
    };
    params.validate().map_err(flag_message)?;
    Ok(params)
}

/// Rephrases a configuration error in terms of the command-line flags.
fn flag_message(err: ConfigurationError) -> String {
    match err {
        ConfigurationError::NonPositive { field, .. } => {
            format!("--{} must be > 0", field.replace('_', "-"))
        }
        ConfigurationError::Negative { field, .. } => {
            format!("--{} must be >= 0", field.replace('_', "-"))
        }
        ConfigurationError::CeilingAboveCapacity { .. } => {
            "--partial-refuel-ceiling must be <= --max-fuel".to_string()
        }
        ConfigurationError::NoTrials => "--trials must be > 0".to_string(),
        ConfigurationError::TooManyTrials { max, .. } => format!("--trials must be <= {max}"),
        ConfigurationError::RaceTooLong { max, .. } => {
            format!("--race-time-cutoff / --avg-lap-time must not exceed {max} laps")
        }
        ConfigurationError::InvalidLapRange { max, .. } => format!(
            "--caution-first-lap must be >= 1 and <= --caution-last-lap, which must be <= {max}"
        ),
        ConfigurationError::TooManyCautionPeriods { max, .. } => {
            format!("--caution-count must be <= {max}")
        }
        ConfigurationError::TooManyCautions {
            requested,
            available,
        } => format!(
            "--caution-count ({requested}) must be <= the {available} laps between --caution-first-lap and --caution-last-lap"
        ),
        ConfigurationError::InvalidCautionDuration { .. } => {
            "--caution-min-minutes must be at least one second and <= --caution-max-minutes"
                .to_string()
        }
    }
}

/// Runs the `simulate` command. `args` starts with the command name.
pub fn run_cli<I, T>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let json = cli.json;
    let trace_trial = cli.trace_trial;
    let params = build_params(cli)?;
    if let Some(trial) = trace_trial {
        if trial == 0 || trial > params.trials {
            return Err("--trace-trial must be between 1 and --trials".to_string());
        }
    }

    let batch = run_batch(&params).map_err(|e| e.to_string())?;
    if json {
        let response = build_simulate_response(&params, batch, trace_trial);
        let body = serde_json::to_string_pretty(&response)
            .map_err(|e| format!("Failed to encode result: {e}"))?;
        println!("{body}");
    } else {
        print!("{}", render_report(&batch, trace_trial));
    }
    Ok(())
}

fn render_report(batch: &BatchResult, trace_trial: Option<u32>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5}  {:>9}  {:>12}  {:>10}  {:>12}  {:<17}  {:>8}",
        "trial", "full laps", "partial laps", "full time", "partial time", "winner", "gap"
    );
    for row in &batch.rows {
        match row {
            TrialRow::Completed(o) => {
                let _ = writeln!(
                    out,
                    "{:>5}  {:>9}  {:>12}  {:>10.1}  {:>12.1}  {:<17}  {:>8.1}",
                    o.trial,
                    o.full_laps,
                    o.partial_laps,
                    o.full_time,
                    o.partial_time,
                    o.winner.label(),
                    o.gap
                );
            }
            TrialRow::Failed { trial, error } => {
                let _ = writeln!(out, "{trial:>5}  failed: {error}");
            }
        }
    }

    let summary = &batch.summary;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Full wins:    {} ({:.1}%)",
        summary.full_wins, summary.full_win_percent
    );
    let _ = writeln!(
        out,
        "Partial wins: {} ({:.1}%)",
        summary.partial_wins, summary.partial_win_percent
    );
    let _ = writeln!(out, "Ties:         {}", summary.ties);
    let _ = writeln!(out, "Average gap:  {:.1} s", summary.average_gap);
    if summary.failed > 0 {
        let _ = writeln!(out, "Failed:       {}", summary.failed);
    }

    if let Some(traces) = trace_trial.and_then(|trial| batch.traces.get(&trial)) {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:>4}  {:>9}  {:>12}  {:>8}",
            "lap", "full fuel", "partial fuel", "gap"
        );
        let gaps = traces.gap_per_lap();
        for ((full, partial), gap) in traces.full.iter().zip(&traces.partial).zip(gaps) {
            let marker = if full.pitted() || partial.pitted() {
                " *"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "{:>4}  {:>9.1}  {:>12.1}  {:>8.1}{marker}",
                full.lap, full.fuel, partial.fuel, gap
            );
        }
    }
    out
}

fn build_router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "pitwall HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, build_router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let ApiRequest { params, options } = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    debug!(
        trials = params.trials,
        seed = params.seed,
        "simulate request accepted"
    );

    let outcome = tokio::task::spawn_blocking(move || {
        run_batch(&params)
            .map(|batch| build_simulate_response(&params, batch, options.trace_trial))
    })
    .await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(SimulationError::Configuration(err))) => {
            error_response(StatusCode::BAD_REQUEST, &flag_message(err))
        }
        Ok(Err(err)) => {
            error!(error = %err, "batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
        Err(join_err) => {
            error!(error = %join_err, "simulation task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.max_fuel {
        cli.max_fuel = v;
    }
    if let Some(v) = payload.fuel_usage_green {
        cli.fuel_usage_green = v;
    }
    if let Some(v) = payload.fuel_usage_caution {
        cli.fuel_usage_caution = v;
    }
    if let Some(v) = payload.pit_speed_kph {
        cli.pit_speed_kph = v;
    }
    if let Some(v) = payload.avg_lap_time {
        cli.avg_lap_time = v;
    }
    if let Some(v) = payload.circuit_length_km {
        cli.circuit_length_km = v;
    }
    if let Some(v) = payload.pitlane_length_km {
        cli.pitlane_length_km = v;
    }
    if let Some(v) = payload.refuel_rate {
        cli.refuel_rate = v;
    }
    if let Some(v) = payload.pit_overhead {
        cli.pit_overhead = v;
    }
    if let Some(v) = payload.partial_refuel_ceiling {
        cli.partial_refuel_ceiling = v;
    }
    if let Some(v) = payload.caution_count {
        cli.caution_count = v;
    }
    if let Some(v) = payload.caution_min_minutes {
        cli.caution_min_minutes = v;
    }
    if let Some(v) = payload.caution_max_minutes {
        cli.caution_max_minutes = v;
    }
    if let Some(v) = payload.caution_first_lap {
        cli.caution_first_lap = v;
    }
    if let Some(v) = payload.caution_last_lap {
        cli.caution_last_lap = v;
    }
    if let Some(v) = payload.race_time_cutoff {
        cli.race_time_cutoff = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }
    if let Some(v) = payload.parallel {
        cli.parallel = v;
    }
    // A named policy sets both knobs; explicit knobs still win.
    if let Some(v) = payload.pit_policy {
        let policy = PitPolicy::from(v);
        cli.refuel_bound = policy.refuel_bound.into();
        cli.caution_budget = policy.caution_budget.into();
    }
    if let Some(v) = payload.refuel_bound {
        cli.refuel_bound = v.into();
    }
    if let Some(v) = payload.caution_budget {
        cli.caution_budget = v.into();
    }

    let params = build_params(cli)?;
    let options = ApiOptions {
        trace_trial: payload.trace_trial,
    };
    if let Some(trial) = options.trace_trial {
        if trial == 0 || trial > params.trials {
            return Err("traceTrial must be between 1 and trials".to_string());
        }
    }

    Ok(ApiRequest { params, options })
}

fn default_cli_for_api() -> Cli {
    let defaults = SimulationParameters::default();
    Cli {
        max_fuel: defaults.max_fuel,
        fuel_usage_green: defaults.fuel_usage_green,
        fuel_usage_caution: defaults.fuel_usage_caution,
        pit_speed_kph: defaults.pit_speed_kph,
        avg_lap_time: defaults.avg_lap_time,
        circuit_length_km: defaults.circuit_length_km,
        pitlane_length_km: defaults.pitlane_length_km,
        refuel_rate: defaults.refuel_rate,
        pit_overhead: defaults.pit_overhead,
        partial_refuel_ceiling: defaults.partial_refuel_ceiling,
        caution_count: defaults.caution_count,
        caution_min_minutes: defaults.caution_min_minutes,
        caution_max_minutes: defaults.caution_max_minutes,
        caution_first_lap: defaults.caution_first_lap,
        caution_last_lap: defaults.caution_last_lap,
        race_time_cutoff: defaults.race_time_cutoff,
        trials: defaults.trials,
        seed: defaults.seed,
        refuel_bound: defaults.pit_policy.refuel_bound.into(),
        caution_budget: defaults.pit_policy.caution_budget.into(),
        parallel: defaults.parallel,
        json: false,
        trace_trial: None,
    }
}

fn build_simulate_response(
    params: &SimulationParameters,
    mut batch: BatchResult,
    trace_trial: Option<u32>,
) -> SimulateResponse {
    // A failed trial has no traces, so the field is simply left out.
    let trial_trace = trace_trial.and_then(|trial| {
        batch
            .traces
            .remove(&trial)
            .map(|traces| TrialTraceResponse {
                trial,
                gap_per_lap: traces.gap_per_lap(),
                traces,
            })
    });
    SimulateResponse {
        seed: params.seed,
        pit_policy: params.pit_policy,
        summary: batch.summary,
        results: batch.rows,
        trial_trace,
    }
}
