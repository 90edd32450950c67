//! # Custom Tools Example
//!
//! This example demonstrates how to write tools in Rust and hand them to the agent.
//!
//! ## Usage
//!
//! ```bash
//! export OPENAI_API_KEY="your-api-key"
//! cargo run --example custom_tools
//! ```

use agent_eval::agent::LoggingHandler;
use agent_eval::prelude::*;
use agent_eval::tool::ParameterSchema;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum Unit {
    Celsius,
    Fahrenheit,
}

/// Arguments for `get_weather`.
#[derive(Debug, Deserialize, JsonSchema)]
struct WeatherArgs {
    /// City name
    location: String,
    /// Temperature unit
    unit: Option<Unit>,
}

/// A custom tool that gets the current weather.
#[derive(Debug)]
struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("get_weather", "Get the current weather for a location")
            .with_parameters(ParameterSchema::for_type::<WeatherArgs>().unwrap_or_default())
            .read_only()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: WeatherArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        // Simulated weather lookup
        let report = match args.unit.unwrap_or(Unit::Celsius) {
            Unit::Fahrenheit => "72°F and sunny",
            Unit::Celsius => "22°C and sunny",
        };
        Ok(format!("The weather in {} is {}", args.location, report))
    }
}

/// A custom tool that does arithmetic on two numbers.
#[derive(Debug)]
struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("calculate", "Perform basic arithmetic on two numbers")
            .with_property(
                "operation",
                PropertySchema::string("Operation to apply").one_of(["add", "subtract", "multiply", "divide"]),
                true,
            )
            .with_property("a", PropertySchema::new(agent_eval::tool::PropertyType::Number), true)
            .with_property("b", PropertySchema::new(agent_eval::tool::PropertyType::Number), true)
            .read_only()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let number = |key: &str| {
            args[key]
                .as_f64()
                .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be a number")))
        };
        let (a, b) = (number("a")?, number("b")?);

        let result = match args["operation"].as_str() {
            Some("add") => a + b,
            Some("subtract") => a - b,
            Some("multiply") => a * b,
            Some("divide") if b == 0.0 => {
                return Err(ToolError::ExecutionFailed("Division by zero".to_string()));
            }
            Some("divide") => a / b,
            _ => {
                return Err(ToolError::InvalidArguments(
                    "Unknown operation. Supported: add, subtract, multiply, divide".to_string(),
                ));
            }
        };

        Ok(result.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider = ProviderBuilder::new().build_openai()?;

    let custom = StaticSource::new("demo")
        .with("weather", || Ok(Arc::new(WeatherTool) as DynTool))
        .with("calculator", || Ok(Arc::new(CalculatorTool) as DynTool));
    let sources: Vec<Box<dyn ToolSource>> = vec![Box::new(builtin_source(false)), Box::new(custom)];

    let report = ToolRegistry::discover(&sources);
    for error in &report.errors {
        eprintln!("Skipped tool: {error}");
    }
    println!("Registered tools: {:?}", report.registry.names());

    let config = AgentConfig {
        approval: ApprovalPolicy::new(ApprovalMode::AutoApproveReadOnly),
        ..AgentConfig::default()
    };
    let mut agent = AgentLoop::new(provider, Arc::new(report.registry), config)
        .with_event_handler(Arc::new(LoggingHandler));

    let outcome = agent
        .submit("What's the weather in Tokyo? Also, what's 15 multiplied by 7?")
        .await?;

    println!("\nAgent: {}", outcome.text);
    println!(
        "Tools used: {:?} in {} iterations",
        outcome.tools_used, outcome.metrics.iteration_count
    );

    Ok(())
}
