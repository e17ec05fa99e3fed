use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use mailer_core::{
    logging::{init_logging, LogFormat},
    AppConfig, NewCampaign, Recipient,
};
use mailer_dispatcher::CampaignOperations;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::Application;
use shutdown::wait_for_shutdown_signal;

fn cli() -> Command {
    let campaign_id = || {
        Arg::new("campaign-id")
            .value_name("CAMPAIGN_ID")
            .help("活动ID")
            .required(true)
    };

    Command::new("mailer")
        .version("1.0.0")
        .about("基于消息队列的批量邮件投递系统")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次尝试默认路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("consume").about("运行消费循环，直到收到关闭信号"))
        .subcommand(
            Command::new("create")
                .about("创建草稿活动")
                .arg(
                    Arg::new("name")
                        .long("name")
                        .value_name("NAME")
                        .help("活动名称")
                        .required(true),
                )
                .arg(
                    Arg::new("subject")
                        .long("subject")
                        .value_name("SUBJECT")
                        .help("邮件主题模板")
                        .required(true),
                )
                .arg(
                    Arg::new("body-file")
                        .long("body-file")
                        .value_name("FILE")
                        .help("HTML正文模板文件")
                        .required(true),
                )
                .arg(
                    Arg::new("recipients")
                        .long("recipients")
                        .value_name("FILE")
                        .help("收件人JSON文件，格式为 [{\"email\": ..., \"data\": {...}}]")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("start")
                .about("启动活动，把待处理任务写入队列")
                .arg(campaign_id()),
        )
        .subcommand(
            Command::new("stats")
                .about("按状态统计活动的任务数")
                .arg(campaign_id()),
        )
        .subcommand(
            Command::new("retry")
                .about("把首次失败的任务重置为待处理")
                .arg(campaign_id()),
        )
        .subcommand(
            Command::new("jobs")
                .about("列出活动的全部任务")
                .arg(campaign_id()),
        )
        .subcommand(Command::new("list").about("列出全部活动"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;

    let (name, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("缺少子命令"))?;

    match name {
        "consume" => consume(config).await,
        "create" => create(config, sub_matches).await,
        "start" => {
            let app = Application::new(config).await?;
            let report = app
                .dispatching_service()
                .await?
                .start_campaign(campaign_id(sub_matches)?)
                .await?;
            info!("活动 {} 已启动，入队消息数: {}", report.campaign_id, report.enqueued);
            print_json(&serde_json::json!({
                "campaignId": report.campaign_id,
                "enqueued": report.enqueued,
            }))
        }
        "stats" => {
            let app = Application::new(config).await?;
            let stats = app
                .campaign_service()
                .campaign_stats(campaign_id(sub_matches)?)
                .await?;
            print_json(&stats)
        }
        "retry" => {
            let app = Application::new(config).await?;
            let reset = app
                .campaign_service()
                .retry_failed_jobs(campaign_id(sub_matches)?)
                .await?;
            print_json(&serde_json::json!({ "reset": reset }))
        }
        "jobs" => {
            let app = Application::new(config).await?;
            let jobs = app
                .campaign_service()
                .list_jobs(campaign_id(sub_matches)?)
                .await?;
            print_json(&jobs)
        }
        "list" => {
            let app = Application::new(config).await?;
            print_json(&app.campaign_service().list_campaigns().await?)
        }
        other => Err(anyhow!("不支持的子命令: {other}")),
    }
}

/// 运行消费循环，收到关闭信号后等待当前批次完成
async fn consume(config: AppConfig) -> Result<()> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_bind_address
            .parse()
            .with_context(|| {
                format!("无效的指标监听地址: {}", config.observability.metrics_bind_address)
            })?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("启动Prometheus指标导出器失败")?;
        info!("Prometheus指标导出器监听于 {addr}");
    }

    let drain_timeout = config.queue.drain_timeout();
    let app = Arc::new(Application::new(config).await?);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let mut app_handle = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run_consumer(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut app_handle => {
            // 消费循环只会因启动失败而提前退出
            return result.context("消费任务异常退出")?;
        }
        _ = wait_for_shutdown_signal() => {}
    }

    info!("收到关闭信号，最多等待 {:?} 让当前批次处理完成...", drain_timeout);
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(drain_timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("消费循环已优雅关闭"),
        Ok(Ok(Err(e))) => error!("消费循环关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("消费任务异常退出: {e}"),
        Err(_) => warn!("消费循环关闭超时，强制退出"),
    }
    Ok(())
}

async fn create(config: AppConfig, matches: &ArgMatches) -> Result<()> {
    let body_file = required(matches, "body-file")?;
    let body = tokio::fs::read_to_string(body_file)
        .await
        .with_context(|| format!("读取正文模板失败: {body_file}"))?;

    let recipients_file = required(matches, "recipients")?;
    let raw = tokio::fs::read_to_string(recipients_file)
        .await
        .with_context(|| format!("读取收件人文件失败: {recipients_file}"))?;
    let recipients: Vec<Recipient> = serde_json::from_str(&raw)
        .with_context(|| format!("收件人文件不是合法的JSON数组: {recipients_file}"))?;

    let input = NewCampaign {
        name: required(matches, "name")?.to_string(),
        subject: required(matches, "subject")?.to_string(),
        body,
        recipients,
        metadata: None,
    };

    let app = Application::new(config).await?;
    let campaign = app.campaign_service().create_campaign(input).await?;
    print_json(&campaign)
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("缺少参数: --{name}"))
}

fn campaign_id(matches: &ArgMatches) -> Result<&str> {
    required(matches, "campaign-id")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
