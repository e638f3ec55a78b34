//! 子命令实现
//!
//! 每个命令启动一个独立的控制器，以 `cli` 为键注册一个通道观察者，结束时关闭控制器。

use anyhow::{Result, bail};
use blecentral_core::{
    BtleplugAdapterFactory, CentralController, CentralEvent, CentralSettings, CentralStatus,
    ChannelObserver, LogReporter, PeripheralHandle, PeripheralId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

const OBSERVER_KEY: &str = "cli";
const POWER_ON_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScanArgs {
    pub timeout: u64,
    pub services: Vec<Uuid>,
    pub beacons_only: bool,
    pub json: bool,
}

fn start(settings: &CentralSettings) -> (CentralController, UnboundedReceiver<CentralEvent>) {
    let central = CentralController::builder(Arc::new(BtleplugAdapterFactory))
        .with_settings(settings.clone())
        .with_reporter(Arc::new(LogReporter))
        .start();
    let (observer, rx) = ChannelObserver::new();
    central.register(OBSERVER_KEY, Arc::new(observer));
    (central, rx)
}

/// 创建适配器并等待上电
async fn power_on(
    central: &CentralController,
    rx: &mut UnboundedReceiver<CentralEvent>,
) -> Result<()> {
    central.enable().await?;

    let powered = tokio::time::timeout(POWER_ON_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if let CentralEvent::StateChanged { state } = event {
                tracing::debug!("Adapter state: {}", state);
                if state.is_powered_on() {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !powered {
        let status = central.status().await?;
        bail!("蓝牙适配器未就绪 (状态: {})", status.state);
    }
    Ok(())
}

pub async fn scan(settings: &CentralSettings, args: ScanArgs) -> Result<()> {
    let (central, mut rx) = start(settings);
    power_on(&central, &mut rx).await?;

    let services = if args.services.is_empty() {
        settings.service_filter()
    } else {
        Some(args.services)
    };

    if !args.json {
        println!("🔍 扫描设备 ({}s)...", args.timeout);
    }
    central.scan(services, false);

    let mut seen = BTreeSet::new();
    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Some(CentralEvent::Located { peripheral }) => {
                    if args.beacons_only && peripheral.beacon().is_none() {
                        continue;
                    }
                    if args.json {
                        println!("{}", serde_json::to_string(&peripheral)?);
                    } else if seen.insert(peripheral.id().clone()) {
                        print_peripheral(&peripheral);
                    }
                }
                Some(CentralEvent::StateChanged { state }) if !state.is_powered_on() => {
                    tracing::warn!("Adapter left powered on state: {}", state);
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    central.stop_scan();
    central.unregister(OBSERVER_KEY);
    if !args.json {
        if seen.is_empty() {
            println!("   未发现设备");
        } else {
            println!("   共发现 {} 个设备", seen.len());
        }
    }
    central.shutdown().await?;
    Ok(())
}

fn print_peripheral(peripheral: &PeripheralHandle) {
    let rssi = peripheral
        .rssi()
        .map(|r| format!("{} dBm", r))
        .unwrap_or_else(|| "-".to_string());
    let name = peripheral.local_name().unwrap_or("(unknown)");

    match peripheral.beacon() {
        Some(beacon) => println!(
            "   {}  {}  {}  📡 {} (power {})",
            peripheral.id(),
            name,
            rssi,
            beacon,
            beacon.measured_power
        ),
        None => println!("   {}  {}  {}", peripheral.id(), name, rssi),
    }
}

pub async fn connect(settings: &CentralSettings, id: String, timeout: u64) -> Result<()> {
    let (central, mut rx) = start(settings);
    power_on(&central, &mut rx).await?;

    let target = PeripheralId::new(id);
    println!("🔍 查找 {} ...", target);
    central.scan(settings.service_filter(), false);

    // 调用方计时器：到期后通知所有观察者
    let timer = {
        let central = central.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout)).await;
            central.report_timeout();
        })
    };

    let mut connecting: Option<PeripheralHandle> = None;
    let mut failure: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            CentralEvent::Located { peripheral }
                if connecting.is_none() && peripheral.id() == &target =>
            {
                println!("🔗 正在连接 {} ...", target);
                central.stop_scan();
                central.connect(&peripheral, None);
                connecting = Some(peripheral);
            }
            CentralEvent::Connected { peripheral } if peripheral.id() == &target => {
                timer.abort();
                println!("✅ 已连接 {}", target);
                central.disconnect(&peripheral);
            }
            CentralEvent::CouldNotConnect { peripheral, error } if peripheral.id() == &target => {
                failure = Some(error.unwrap_or_else(|| "unknown error".to_string()));
                break;
            }
            CentralEvent::Disconnected { peripheral, error } if peripheral.id() == &target => {
                match error {
                    Some(e) => println!("🔌 连接断开: {}", e),
                    None => println!("🔌 已断开"),
                }
                break;
            }
            CentralEvent::Timeout => {
                println!("⏱️  {}s 内未能连接", timeout);
                match &connecting {
                    Some(peripheral) => central.disconnect(peripheral),
                    None => central.stop_scan(),
                }
                failure = Some("timeout".to_string());
                break;
            }
            _ => {}
        }
    }

    timer.abort();
    central.unregister(OBSERVER_KEY);
    central.shutdown().await?;

    if let Some(reason) = failure {
        bail!("连接 {} 失败: {}", target, reason);
    }
    Ok(())
}

pub async fn status(settings: &CentralSettings, json: bool) -> Result<()> {
    let (central, mut rx) = start(settings);
    if let Err(e) = power_on(&central, &mut rx).await {
        tracing::warn!("{}", e);
    }

    let status = central.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    central.shutdown().await?;
    Ok(())
}

fn print_status(status: &CentralStatus) {
    println!("状态: {}", status.state);
    println!("适配器: {}", if status.adapter_present { "已创建" } else { "无" });
    println!("扫描中: {}", status.scanning);
    println!("观察者: {}", status.observers);
    if status.restored.is_empty() {
        println!("恢复的外设: 无");
    } else {
        println!("恢复的外设:");
        for peripheral in &status.restored {
            let mark = if peripheral.pending_disconnect() {
                "等待断开"
            } else {
                "已请求断开"
            };
            println!("   {} ({})", peripheral.id(), mark);
        }
    }
}

pub fn config_show(settings: &CentralSettings) -> Result<()> {
    println!("# {}", CentralSettings::config_path().display());
    print!("{}", settings.to_toml()?);
    Ok(())
}

pub fn config_init(force: bool) -> Result<()> {
    let path = CentralSettings::config_path();
    if path.exists() && !force {
        bail!("配置文件已存在: {} (使用 --force 覆盖)", path.display());
    }
    let path = CentralSettings::default().save()?;
    println!("✅ 已写入默认配置: {}", path.display());
    Ok(())
}
