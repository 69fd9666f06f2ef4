// Calculator fixture
//
// A small interface exercising every kind of method the registry distinguishes: routed
// methods, a method that fails, one that never returns, an object method and a local-only
// method. `CalculatorClient` shows how a typed client sits on top of `ClusterAsync`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cluster_registry::{Args, ClusterAsync, Interface};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const CALCULATOR_INTERFACE: &str = "com.example.Calculator";

#[async_trait]
pub trait Calculator: Send + Sync {
    async fn add(&self, a: i32, b: i32) -> Result<i32>;

    async fn divide(&self, a: i32, b: i32) -> Result<i32>;

    /// Never completes
    async fn hang(&self) -> Result<()>;
}

/// Calculator implementation counting the calls it serves
pub struct SimpleCalculator {
    name: String,
    calls: AtomicUsize,
}

impl SimpleCalculator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Calculator for SimpleCalculator {
    async fn add(&self, a: i32, b: i32) -> Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(a + b)
    }

    async fn divide(&self, a: i32, b: i32) -> Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if b == 0 {
            return Err(anyhow!("division by zero"));
        }
        Ok(a / b)
    }

    async fn hang(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

async fn add(calculator: Arc<dyn Calculator>, args: Args) -> Result<Value> {
    let sum = calculator.add(args.get(0)?, args.get(1)?).await?;
    Ok(json!(sum))
}

async fn divide(calculator: Arc<dyn Calculator>, args: Args) -> Result<Value> {
    let quotient = calculator.divide(args.get(0)?, args.get(1)?).await?;
    Ok(json!(quotient))
}

async fn hang(calculator: Arc<dyn Calculator>, _args: Args) -> Result<Value> {
    calculator.hang().await?;
    Ok(Value::Null)
}

async fn describe(_calculator: Arc<dyn Calculator>, _args: Args) -> Result<Value> {
    Ok(json!("calculator"))
}

fn no_params() -> Vec<String> {
    Vec::new()
}

/// Interface table of [`Calculator`]
pub fn calculator_interface() -> Arc<Interface<dyn Calculator>> {
    Interface::<dyn Calculator>::builder(CALCULATOR_INTERFACE)
        .method("add", ["int", "int"], add)
        .method("divide", ["int", "int"], divide)
        .method("hang", no_params(), hang)
        .method("toString", no_params(), describe)
        .local_method("precision", no_params(), |_args: &Args| Ok(json!("int32")))
        .build()
}

/// Interface declaring nothing but object methods
pub fn object_only_interface() -> Arc<Interface<dyn Calculator>> {
    Interface::<dyn Calculator>::builder("com.example.Plain")
        .method("hashCode", no_params(), describe)
        .method("equals", ["java.lang.Object"], describe)
        .method("toString", no_params(), describe)
        .build()
}

/// Typed client for a calculator hosted somewhere in the cluster
pub struct CalculatorClient {
    proxy: ClusterAsync<dyn Calculator>,
}

impl CalculatorClient {
    pub fn new(proxy: ClusterAsync<dyn Calculator>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &ClusterAsync<dyn Calculator> {
        &self.proxy
    }
}

#[async_trait]
impl Calculator for CalculatorClient {
    async fn add(&self, a: i32, b: i32) -> Result<i32> {
        Ok(self.proxy.invoke("add", vec![json!(a), json!(b)]).await?)
    }

    async fn divide(&self, a: i32, b: i32) -> Result<i32> {
        Ok(self.proxy.invoke("divide", vec![json!(a), json!(b)]).await?)
    }

    async fn hang(&self) -> Result<()> {
        self.proxy.invoke::<Value>("hang", vec![]).await?;
        Ok(())
    }
}
