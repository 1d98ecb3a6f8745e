//! Racing shipping providers for an acceptable quote.
//!
//! Demonstrates:
//! - A contest whose winner must fit a budget
//! - Providers that stop early when their context is cancelled
//! - Caller-level policy when nobody wins: take the cheapest quote anyway

use kumihimo::duplicate_via_clone;
use kumihimo::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Shipment {
    parcel_grams: u32,
    budget_cents: u64,
    quote: Option<(String, u64)>,
}

duplicate_via_clone!(Shipment);

/// A provider that answers after `latency` unless it is called off first.
fn provider(carrier: &'static str, latency_ms: u64, cents_per_kg: u64) -> Step<Shipment> {
    Step::new(carrier, move |ctx: Context, mut shipment: Shipment| async move {
        tokio::select! {
            cause = ctx.done() => {
                println!("  {carrier} stopped: {cause}");
                Err::<Shipment, BoxError>(cause.into())
            }
            _ = tokio::time::sleep(Duration::from_millis(latency_ms)) => {
                let kg = u64::from(shipment.parcel_grams).div_ceil(1000);
                let cents = kg * cents_per_kg;
                println!("  {carrier} quoted {cents} after {latency_ms}ms");
                shipment.quote = Some((carrier.to_string(), cents));
                Ok(shipment)
            }
        }
    })
}

fn providers() -> [Step<Shipment>; 3] {
    [
        provider("postal", 10, 900),
        provider("courier", 50, 450),
        provider("freight", 200, 300),
    ]
}

fn within_budget() -> Result<Contest<Shipment>, ConfigError> {
    let [postal, courier, freight] = providers();
    Contest::builder("within_budget")
        .branch(postal)
        .branch(courier)
        .branch(freight)
        .accept(|_ctx, shipment: &Shipment| {
            shipment
                .quote
                .as_ref()
                .is_some_and(|(_, cents)| *cents <= shipment.budget_cents)
        })
        .build()
}

/// Asks every provider in turn and keeps the cheapest answer.
fn cheapest_regardless() -> Step<Shipment> {
    Step::new("cheapest_regardless", |ctx: Context, shipment: Shipment| async move {
        let mut best: Option<Shipment> = None;
        for candidate in providers() {
            let quoted = candidate.process(&ctx, shipment.duplicate()).await?;
            let cheaper = match (&best, &quoted.quote) {
                (Some(Shipment { quote: Some((_, low)), .. }), Some((_, cents))) => cents < low,
                _ => true,
            };
            if cheaper {
                best = Some(quoted);
            }
        }
        best.ok_or_else(|| BoxError::from("no provider answered"))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let quote = Fallback::builder("quote")
        .or(within_budget()?)
        .or(cheapest_regardless())
        .build()?;

    for budget_cents in [1000, 100] {
        let shipment = Shipment {
            parcel_grams: 1500,
            budget_cents,
            quote: None,
        };

        println!("\nBudget {budget_cents}:");
        let ctx = Context::new().with_timeout(Duration::from_secs(2));
        match quote.process(&ctx, shipment).await {
            Ok(Shipment {
                quote: Some((carrier, cents)),
                ..
            }) => println!("Booked {carrier} for {cents}"),
            Ok(_) => println!("No quote recorded"),
            Err(failure) => eprintln!("Quote failed: {failure}"),
        }
    }

    // let the losers of the last contest print their cancellation
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(())
}
