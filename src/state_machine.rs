//! 灯光模式状态机模块
//!
//! 管理单路LED的工作模式（关、常亮、闪烁、呼吸、等待连接），
//! 在每个tick计算输出占空比，并在进入/离开等待模式时保存与恢复用户模式。

use crate::config;
use crate::led_control::DutyWriter;
use core::f32::consts::PI;

/// 灯光模式枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Off,
    On,
    Blink,
    Breathe,
    // 无客户端时自动进入，不可由命令选择
    IdleWait,
}

impl Mode {
    /// 状态上报与持久化使用的名称
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::On => "on",
            Mode::Blink => "blink",
            Mode::Breathe => "breathe",
            Mode::IdleWait => "idle_wait",
        }
    }

    /// 解析用户可选择的模式名称
    pub fn from_user_str(name: &str) -> Option<Self> {
        match name {
            "off" => Some(Mode::Off),
            "on" => Some(Mode::On),
            "blink" => Some(Mode::Blink),
            "breathe" => Some(Mode::Breathe),
            _ => None,
        }
    }
}

/// 模式参数，同时作为等待模式的快照和持久化单元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeParams {
    pub mode: Mode,
    pub blink_hz: u32,
    pub breathe_period_ms: u32,
    pub brightness: u8,
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            mode: Mode::Breathe,
            blink_hz: config::DEFAULT_BLINK_HZ,
            breathe_period_ms: config::DEFAULT_BREATHE_PERIOD_MS,
            brightness: config::DEFAULT_BRIGHTNESS,
        }
    }
}

impl ModeParams {
    /// 限制参数下界；等待模式不会被持久化，按呼吸处理
    pub fn sanitized(self) -> Self {
        Self {
            mode: match self.mode {
                Mode::IdleWait => Mode::Breathe,
                other => other,
            },
            blink_hz: self.blink_hz.max(config::MIN_BLINK_HZ),
            breathe_period_ms: self.breathe_period_ms.max(config::MIN_BREATHE_PERIOD_MS),
            brightness: self.brightness,
        }
    }
}

/// 呼吸包络：(1 - cos 2πφ) / 2，φ = (now mod period) / period
pub fn breathe_duty(now_ms: u64, period_ms: u32, brightness: u8, scale: f32) -> u8 {
    if period_ms == 0 {
        return 0;
    }
    let period = period_ms as u64;
    let phase = (now_ms % period) as f32 / period as f32;
    let envelope = (1.0 - libm::cosf(2.0 * PI * phase)) / 2.0 * scale;
    let duty = envelope * brightness as f32;
    duty.clamp(0.0, 255.0) as u8
}

/// 灯光模式状态机
pub struct ModeStateMachine<D: DutyWriter> {
    output: D,
    mode: Mode,
    blink_hz: u32,
    breathe_period_ms: u32,
    brightness: u8,
    saved_before_wait: Option<ModeParams>,
    last_tick_ms: u64,
    last_toggle_ms: u64,
    blink_on: bool,
}

impl<D: DutyWriter> ModeStateMachine<D> {
    /// 创建状态机：先关闭输出，再应用加载的模式
    pub fn new(mut output: D, params: ModeParams, now_ms: u64) -> Self {
        output.write_duty(0);

        let params = params.sanitized();
        let mut machine = Self {
            output,
            mode: Mode::Off,
            blink_hz: params.blink_hz,
            breathe_period_ms: params.breathe_period_ms,
            brightness: params.brightness,
            saved_before_wait: None,
            last_tick_ms: now_ms,
            last_toggle_ms: now_ms,
            blink_on: false,
        };
        machine.apply_mode(params);
        machine
    }

    /// 获取当前模式
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn blink_hz(&self) -> u32 {
        self.blink_hz
    }

    pub fn breathe_period_ms(&self) -> u32 {
        self.breathe_period_ms
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// 等待模式前保存的快照
    pub fn saved_before_wait(&self) -> Option<ModeParams> {
        self.saved_before_wait
    }

    /// 当前生效的模式与参数
    pub fn params(&self) -> ModeParams {
        ModeParams {
            mode: self.mode,
            blink_hz: self.blink_hz,
            breathe_period_ms: self.breathe_period_ms,
            brightness: self.brightness,
        }
    }

    /// 需要持久化的参数；等待模式下返回快照，等待模式的覆盖值不写入存储
    pub fn persisted_params(&self) -> ModeParams {
        match (self.mode, self.saved_before_wait) {
            (Mode::IdleWait, Some(saved)) => saved,
            _ => self.params().sanitized(),
        }
    }

    /// 获取输出驱动
    pub fn output(&self) -> &D {
        &self.output
    }

    pub fn set_on(&mut self) {
        self.leave_idle_wait();
        self.mode = Mode::On;
        log::info!("[MODE] on, brightness {}", self.brightness);
    }

    pub fn set_off(&mut self) {
        self.leave_idle_wait();
        self.mode = Mode::Off;
        log::info!("[MODE] off");
    }

    /// 切换到闪烁模式；频率为0时保持熄灭
    pub fn set_blink(&mut self, hz: u32) {
        self.leave_idle_wait();
        self.blink_hz = hz;
        self.mode = Mode::Blink;
        // 从熄灭半周期重新开始
        self.blink_on = false;
        self.last_toggle_ms = self.last_tick_ms;
        log::info!("[MODE] blink at {} Hz", hz);
    }

    /// 切换到呼吸模式；周期为0时输出关闭
    pub fn set_breathe(&mut self, period_ms: u32) {
        self.leave_idle_wait();
        self.breathe_period_ms = period_ms;
        self.mode = Mode::Breathe;
        log::info!("[MODE] breathe, period {} ms", period_ms);
    }

    /// 设置亮度上限；常亮或闪烁亮半周期时立即生效
    pub fn set_brightness(&mut self, duty: u8) {
        if self.mode == Mode::IdleWait {
            if let Some(saved) = self.saved_before_wait.as_mut() {
                // 等待模式保持自身亮度，新值在恢复时生效
                saved.brightness = duty;
                log::info!("[MODE] brightness {} deferred until restore", duty);
                return;
            }
        }

        self.brightness = duty;
        let lit = match self.mode {
            Mode::On => true,
            Mode::Blink => self.blink_on,
            Mode::Off | Mode::Breathe | Mode::IdleWait => false,
        };
        if lit {
            self.output.write_duty(duty);
        }
        log::info!("[MODE] brightness {}", duty);
    }

    /// 客户端连接：若处于等待模式则恢复快照，否则不做处理
    pub fn notify_connected(&mut self) {
        if self.mode != Mode::IdleWait {
            return;
        }

        match self.saved_before_wait.take() {
            Some(saved) => {
                log::info!("[MODE] client connected, restoring {}", saved.mode.as_str());
                self.blink_hz = saved.blink_hz;
                self.breathe_period_ms = saved.breathe_period_ms;
                self.apply_mode(saved);
                self.set_brightness(saved.brightness);
            }
            None => {
                log::warn!("[MODE] client connected without snapshot, falling back to breathe");
                self.set_breathe(self.breathe_period_ms);
            }
        }
    }

    /// 进入等待模式；只在首次进入时保存快照，重复调用无副作用
    pub fn enter_idle_wait(&mut self) {
        if self.mode != Mode::IdleWait && self.saved_before_wait.is_none() {
            self.saved_before_wait = Some(self.params());
        }

        if self.mode != Mode::IdleWait {
            log::info!("[MODE] no clients, entering idle wait");
        }
        self.mode = Mode::IdleWait;
        self.breathe_period_ms = config::IDLE_PERIOD_MS;
        self.brightness = config::IDLE_BRIGHTNESS;
    }

    /// 计算并输出当前占空比，每次调用恰好写入一次
    pub fn tick(&mut self, now_ms: u64) -> u8 {
        self.last_tick_ms = now_ms;

        let duty = match self.mode {
            Mode::Off => 0,
            Mode::On => self.brightness,
            Mode::Blink => self.blink_duty(now_ms),
            Mode::Breathe => breathe_duty(now_ms, self.breathe_period_ms, self.brightness, 1.0),
            Mode::IdleWait => breathe_duty(
                now_ms,
                self.breathe_period_ms,
                self.brightness,
                config::IDLE_ENVELOPE_SCALE,
            ),
        };

        self.output.write_duty(duty);
        duty
    }

    fn blink_duty(&mut self, now_ms: u64) -> u8 {
        if self.blink_hz == 0 {
            self.blink_on = false;
            return 0;
        }

        let half_cycle_ms = (500 / self.blink_hz) as u64;
        if now_ms.saturating_sub(self.last_toggle_ms) >= half_cycle_ms {
            self.blink_on = !self.blink_on;
            self.last_toggle_ms = now_ms;
        }

        if self.blink_on { self.brightness } else { 0 }
    }

    fn apply_mode(&mut self, params: ModeParams) {
        match params.mode {
            Mode::Off => self.set_off(),
            Mode::On => self.set_on(),
            Mode::Blink => self.set_blink(params.blink_hz),
            Mode::Breathe | Mode::IdleWait => self.set_breathe(params.breathe_period_ms),
        }
    }

    /// 显式选择模式时离开等待模式：丢弃快照模式，但取回快照中的参数
    fn leave_idle_wait(&mut self) {
        if self.mode != Mode::IdleWait {
            return;
        }
        if let Some(saved) = self.saved_before_wait.take() {
            self.blink_hz = saved.blink_hz;
            self.breathe_period_ms = saved.breathe_period_ms;
            self.brightness = saved.brightness;
            log::info!("[MODE] explicit mode change, idle snapshot dropped");
        }
    }
}
