//! 命令执行器

use anyhow::{Context, Result};
use chrono::TimeDelta;
use consume_shared::config::AppConfig;
use consume_shared::database::Database;
use consume_shared::retry::RetryPolicy;
use serde::Serialize;
use tracing::info;

use super::commands::Commands;
use crate::bootstrap;
use crate::config::EngineConfig;
use crate::models::LimitContext;
use crate::service::{ConsumeRequest, RechargeRequest, TransactionEngine};

pub struct CommandRunner {
    app: AppConfig,
    engine: EngineConfig,
}

impl CommandRunner {
    pub fn new(app: AppConfig, engine: EngineConfig) -> Self {
        Self { app, engine }
    }

    pub async fn run(self, command: Commands) -> Result<()> {
        if let Commands::Migrate { dir } = &command {
            let db = Database::connect(&self.app.database).await?;
            db.run_migrations(dir).await?;
            db.close().await;
            return Ok(());
        }

        let retry_policy = self.engine.retry.clone();
        let (engine, db) = bootstrap::connect(&self.app, self.engine)
            .await
            .context("初始化交易引擎失败")?;
        let outcome = execute(&engine, &retry_policy, command).await;
        db.close().await;
        outcome
    }
}

async fn execute(
    engine: &TransactionEngine,
    retry_policy: &RetryPolicy,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Migrate { .. } => {}
        Commands::OpenAccount {
            person,
            credit_limit,
        } => print(&engine.open_account(person, credit_limit).await?)?,
        Commands::Consume {
            person,
            amount,
            order_no,
            device,
            region,
            mode,
            password,
            retry,
        } => {
            let request = ConsumeRequest {
                order_no,
                device_id: device,
                region_id: region,
                consumption_mode: mode,
                payment_password: password,
                ..ConsumeRequest::new(person, amount)
            };
            let result = if retry {
                engine
                    .process_consume_with_retry(request, retry_policy)
                    .await
            } else {
                engine.process_consume(request).await
            };
            info!(outcome = result.outcome(), "消费处理完成");
            print(&result)?;
        }
        Commands::Recharge {
            person,
            amount,
            order_no,
        } => {
            let request = RechargeRequest {
                order_no,
                ..RechargeRequest::new(person, amount)
            };
            print(&engine.recharge(request).await)?;
        }
        Commands::Refund { order_no, reason } => {
            print(&engine.refund(&order_no, &reason).await)?
        }
        Commands::Query { order_no } => print(&engine.query_consume_result(&order_no).await?)?,
        Commands::Verify { person } => print(&engine.verify_consistency(person).await?)?,
        Commands::Stats { person } => print(&engine.statistics(person).await)?,
        Commands::Usage { person, device } => {
            let context = LimitContext {
                device_id: device,
                ..LimitContext::for_person(person)
            };
            let stats = engine.statistics(person).await;
            print(&engine.limits().usage_report(&context, &stats).await?)?;
            print(&engine.limits().check_conflicts(&context).await?)?;
        }
        Commands::Freeze {
            person,
            reason,
            hours,
        } => print(
            &engine
                .freeze(person, &reason, TimeDelta::hours(hours))
                .await?,
        )?,
        Commands::Unfreeze { person } => engine.unfreeze(person).await?,
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
