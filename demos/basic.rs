use std::sync::Arc;

use serde_json::json;
use webhook_fanout::{validate_webhook_url, Dispatcher, DispatcherConfig, InMemoryWebhookStore, Webhook};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("webhook_fanout=debug").init();

    let store = Arc::new(InMemoryWebhookStore::new());
    let dispatcher = Dispatcher::new(DispatcherConfig::default(), store.clone())
        .expect("dispatcher");

    let url = "https://example.com/webhook";
    validate_webhook_url(url).expect("public webhook URL");

    store
        .upsert(
            Webhook::new("wh_orders", "org_acme", url)
                .with_events(["order.created"])
                .with_secret("supersecret"),
        )
        .await;
    dispatcher.invalidate(&"org_acme".into()).await.ok();

    dispatcher.dispatch(&"org_acme".into(), "order.created", json!({"id": 123}));
    dispatcher.wait_idle().await;
}
