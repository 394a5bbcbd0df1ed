//! 阀门测试台架监督程序入口
//!
//! 加载配置、初始化日志、装配台架服务并运行到 Ctrl-C。
//! `simulate_bench` 启用时使用模拟PLC，由后台任务模拟测量完成和阀门开关。

use anyhow::Context;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use valve_bench_lib::logging::init_logger;
use valve_bench_lib::services::infrastructure::plc::{
    ConventionalTagAddressResolver, GeneralParameterField, GlobalField, ITagAddressResolver, MockTagReader,
    StatusField,
};
use valve_bench_lib::utils::config::{ConfigManager, VALVES_PER_BLOCK};
use valve_bench_lib::{BenchSupervisor, MeasurementType, TagValue};

const CONFIG_FILE: &str = "config/app_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config_manager = ConfigManager::new(PathBuf::from(CONFIG_FILE));
    config_manager.load().await.context("加载配置失败")?;
    let config = config_manager.get_config().clone();
    init_logger(&config.logging_config).context("初始化日志失败")?;

    if !config.app_settings.simulate_bench {
        anyhow::bail!("未集成PLC协议客户端，请在配置中启用 simulate_bench");
    }

    log::info!(
        "🚀 启动 {} ({})，PLC端点 {}（模拟）",
        config.app_settings.app_name,
        config.app_settings.environment,
        config.plc_config.endpoint
    );

    let plc = MockTagReader::new();
    seed_bench(&plc, &config.status_cache_config.blocks);
    let simulator = tokio::spawn(simulate_bench(plc.clone(), config.status_cache_config.blocks.clone()));

    let supervisor = BenchSupervisor::from_config(&config, Arc::new(plc))
        .await
        .context("装配台架服务失败")?;
    supervisor.start_all().await.context("启动台架服务失败")?;

    tokio::signal::ctrl_c().await.context("等待 Ctrl-C 失败")?;
    log::info!("收到退出信号，正在停止...");

    simulator.abort();
    supervisor.stop_all().await.context("停止台架服务失败")?;
    let status = supervisor.status();
    log::info!(
        "本次共采集 {} 条测量记录，{} 个采集周期",
        status.capture.captures_total,
        status.capture.cycles_completed
    );
    Ok(())
}

/// 写入模拟台架的初始标签
fn seed_bench(plc: &MockTagReader, blocks: &[u8]) {
    let resolver = ConventionalTagAddressResolver;
    plc.preset_values([
        (resolver.global_field(GlobalField::BatteryStatus), TagValue::from(true)),
        (resolver.global_field(GlobalField::GeneralErrors), TagValue::from(0i64)),
        (resolver.global_field(GlobalField::TemperaturePlc), TagValue::from(38.5f64)),
        (resolver.global_field(GlobalField::Version), TagValue::from("SIM-1.0")),
    ]);

    for &block in blocks {
        plc.preset_value(resolver.valve_sperre(block), 0u16);
        for field in GeneralParameterField::ALL {
            plc.preset_value(resolver.general_parameter(block, field), 0i64);
        }
        for valve in 1..=VALVES_PER_BLOCK {
            plc.preset_value(resolver.valve_counter(block, valve), 0u64);
            for measurement_type in MeasurementType::ALL {
                plc.preset_value(resolver.ready_counter(block, valve, measurement_type), 0u64);
                plc.preset_value(resolver.status_field(block, valve, measurement_type, StatusField::Status), 0i64);
                for (_, node_id) in resolver.measurement_group(block, valve, measurement_type) {
                    plc.preset_value(node_id, 0.0f64);
                }
            }
        }
    }
}

/// 模拟台架：周期性地让随机阀门开关并完成测量
async fn simulate_bench(plc: MockTagReader, blocks: Vec<u8>) {
    let resolver = ConventionalTagAddressResolver;
    let mut ticker = tokio::time::interval(Duration::from_millis(750));
    loop {
        ticker.tick().await;
        if blocks.is_empty() {
            continue;
        }

        // 随机数生成器不能跨越 await 持有
        let (block, valve, measurement_type, reading) = {
            let mut rng = rand::thread_rng();
            let block = blocks[rng.gen_range(0..blocks.len())];
            let valve = rng.gen_range(1..=VALVES_PER_BLOCK);
            let measurement_type = MeasurementType::ALL[rng.gen_range(0..MeasurementType::ALL.len())];
            (block, valve, measurement_type, rng.gen_range(0.5..2.5f64))
        };

        let switches = plc
            .peek(&resolver.valve_counter(block, valve))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        plc.preset_value(resolver.valve_counter(block, valve), switches + 1);

        for (field, node_id) in resolver.measurement_group(block, valve, measurement_type) {
            if field == "MessID" {
                plc.preset_value(node_id, i64::from(rand::random::<u16>()));
            } else {
                plc.preset_value(node_id, reading);
            }
        }

        let ready_node = resolver.ready_counter(block, valve, measurement_type);
        let ready = plc.peek(&ready_node).and_then(|v| v.as_u64()).unwrap_or(0);
        plc.preset_value(ready_node, ready + 1);
    }
}
