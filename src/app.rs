use std::sync::Arc;

use anyhow::{Context, Result};
use mailer_core::{
    AppConfig, CampaignRepository, EmailJobRepository, EmailProvider, QueueClient,
};
use mailer_dispatcher::CampaignService;
use mailer_infrastructure::{InMemoryQueue, RedisStreamQueue, SendGridProvider, SqliteDatabase};
use mailer_worker::{ConsumerLoop, DeliveryClient};
use tokio::sync::broadcast;
use tracing::info;

/// 进程内队列，只在同一进程内的生产者和消费者之间可见
const MEMORY_QUEUE_SCHEME: &str = "memory://";

/// 应用实例，持有配置与存储
pub struct Application {
    config: AppConfig,
    campaigns: Arc<dyn CampaignRepository>,
    jobs: Arc<dyn EmailJobRepository>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = SqliteDatabase::new(&config.database)
            .await
            .with_context(|| format!("初始化数据库失败: {}", config.database.url))?;

        Ok(Self {
            campaigns: Arc::new(database.campaign_repository()),
            jobs: Arc::new(database.email_job_repository()),
            config,
        })
    }

    /// 不连接队列的活动服务，用于创建、查询和重试
    pub fn campaign_service(&self) -> CampaignService {
        CampaignService::new(Arc::clone(&self.campaigns), Arc::clone(&self.jobs))
    }

    /// 连接队列后的活动服务，用于启动活动
    pub async fn dispatching_service(&self) -> Result<CampaignService> {
        let queue = self.connect_queue().await?;
        Ok(self.campaign_service().with_queue(queue))
    }

    /// 按队列URL的协议选择队列实现
    pub async fn connect_queue(&self) -> Result<Arc<dyn QueueClient>> {
        let url = &self.config.queue.url;
        if url.starts_with(MEMORY_QUEUE_SCHEME) {
            info!("使用进程内队列");
            return Ok(Arc::new(InMemoryQueue::from_config(&self.config.queue)?));
        }

        let queue = RedisStreamQueue::connect(&self.config.queue)
            .await
            .with_context(|| format!("连接消息队列失败: {url}"))?;
        Ok(Arc::new(queue))
    }

    pub fn consumer(
        &self,
        queue: Arc<dyn QueueClient>,
        provider: Arc<dyn EmailProvider>,
    ) -> ConsumerLoop {
        ConsumerLoop::builder(
            queue,
            Arc::clone(&self.jobs),
            Arc::clone(&self.campaigns),
            DeliveryClient::new(provider),
        )
        .worker_config(&self.config.worker)
        .build()
    }

    /// 运行消费循环直到收到关闭信号，当前批次处理完成后返回
    pub async fn run_consumer(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let queue = self.connect_queue().await?;
        let provider =
            SendGridProvider::new(&self.config.delivery).context("初始化邮件服务商失败")?;

        info!(
            "开始消费队列 {}，最大并发数: {}",
            self.config.queue.primary_queue, self.config.worker.max_concurrency
        );
        self.consumer(queue, Arc::new(provider))
            .run(shutdown_rx)
            .await;
        Ok(())
    }
}
