//! Checkout pipeline built from nested compositions.
//!
//! Demonstrates:
//! - A flow whose steps are routers, retries, fallbacks and timeouts
//! - Config-driven guarding of a flaky step
//! - Reading the stage path of a failure

use kumihimo::duplicate_via_clone;
use kumihimo::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum PaymentMethod {
    Card { last4: String },
    BankTransfer { iban: String },
}

#[derive(Debug, Clone)]
struct Order {
    id: String,
    items: Vec<(String, u32, u64)>,
    payment: PaymentMethod,
    country: String,
    total_cents: u64,
    shipping_cents: u64,
    receipt: Vec<String>,
}

duplicate_via_clone!(Order);

fn validate() -> Step<Order> {
    Step::from_fn("validate", |_ctx, mut order: Order| {
        println!("Validating order {}...", order.id);
        if order.items.is_empty() {
            return Err::<Order, BoxError>(format!("order {} has no items", order.id).into());
        }
        order.total_cents = order
            .items
            .iter()
            .map(|(_, quantity, cents)| u64::from(*quantity) * cents)
            .sum();
        Ok(order)
    })
}

/// A card gateway that declines the first call it sees.
fn card_gateway(calls: Arc<AtomicU32>) -> Step<Order> {
    Step::new("card_gateway", move |_ctx, mut order: Order| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if call == 1 {
                return Err::<Order, BoxError>("gateway busy".into());
            }
            if let PaymentMethod::Card { last4 } = &order.payment {
                order
                    .receipt
                    .push(format!("card *{last4} charged {}", order.total_cents));
            }
            Ok(order)
        }
    })
}

fn bank_transfer() -> Step<Order> {
    Step::from_fn("bank_transfer", |_ctx, mut order: Order| {
        if let PaymentMethod::BankTransfer { iban } = &order.payment {
            order
                .receipt
                .push(format!("transfer requested from {iban}"));
        }
        Ok::<_, BoxError>(order)
    })
}

fn payment(calls: Arc<AtomicU32>) -> Result<Router<Order>, ConfigError> {
    let config = StepConfig {
        timeout: Some(Duration::from_millis(200)),
        retry: RetryConfig::new(3, Backoff::fixed(Duration::from_millis(50))),
    };

    Router::builder("payment", |_ctx, order: &Order| match order.payment {
        PaymentMethod::Card { .. } => "card",
        PaymentMethod::BankTransfer { .. } => "bank",
    })
    .route("card", guarded(card_gateway(calls), &config)?)
    .route("bank", bank_transfer())
    .build()
}

fn shipping() -> Result<Fallback<Order>, ConfigError> {
    let live = Step::from_fn("live_rates", |_ctx, order: Order| {
        Err::<Order, BoxError>(format!("no live rates for {}", order.country).into())
    });
    let flat = Step::from_fn("flat_rate", |_ctx, mut order: Order| {
        order.shipping_cents = 499;
        order.receipt.push("flat rate shipping".to_string());
        Ok::<_, BoxError>(order)
    });

    Fallback::builder("shipping").or(live).or(flat).build()
}

fn notify() -> Timeout<Order> {
    let email = Step::new("email_receipt", |_ctx, order: Order| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        println!("Receipt for {}: {:?}", order.id, order.receipt);
        Ok::<_, BoxError>(order)
    });
    Timeout::new("notify", email, Duration::from_millis(500))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let gateway_calls = Arc::new(AtomicU32::new(0));
    let checkout = Flow::new("checkout")
        .then(validate())
        .then(payment(gateway_calls.clone())?)
        .then(shipping()?)
        .then(notify());

    let order = Order {
        id: "ORD-123".to_string(),
        items: vec![
            ("PROD-001".to_string(), 2, 2999),
            ("PROD-002".to_string(), 1, 4999),
        ],
        payment: PaymentMethod::Card {
            last4: "1111".to_string(),
        },
        country: "NZ".to_string(),
        total_cents: 0,
        shipping_cents: 0,
        receipt: Vec::new(),
    };

    let ctx = Context::new().with_timeout(Duration::from_secs(5));
    match checkout.process(&ctx, order.duplicate()).await {
        Ok(done) => println!(
            "\nCheckout completed: {} + {} shipping after {} gateway call(s)",
            done.total_cents,
            done.shipping_cents,
            gateway_calls.load(Ordering::SeqCst)
        ),
        Err(failure) => eprintln!("Checkout failed: {failure}"),
    }

    let empty = Order {
        id: "ORD-124".to_string(),
        items: Vec::new(),
        payment: PaymentMethod::BankTransfer {
            iban: "NZ00 0000".to_string(),
        },
        ..order
    };

    if let Err(failure) = checkout.process(&ctx, empty).await {
        eprintln!(
            "Checkout failed in '{}' at '{}' ({:?})",
            failure.step_name(),
            failure.stage_path(),
            failure.kind()
        );
    }

    Ok(())
}
