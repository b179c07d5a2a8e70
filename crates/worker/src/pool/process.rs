use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use queuectl_errors::{QueueError, QueueResult};

/// 用空信号探测进程是否存在；EPERM 表示进程存在但不属于当前用户
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// 发送信号，进程已不存在时返回 `Ok(false)`
pub fn send_signal(pid: i32, signal: Signal) -> QueueResult<bool> {
    // 0 和负数会作用于整个进程组
    if pid <= 0 {
        return Err(QueueError::Process(format!("无效的进程ID: {pid}")));
    }

    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(QueueError::Process(format!(
            "向进程 {pid} 发送 {signal} 失败: {e}"
        ))),
    }
}
