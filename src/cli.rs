use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ruprobe - 高速随机短链存在性探测与收录工具",
    long_about = "NAME:\n  ruprobe - 高速随机短链存在性探测与收录工具\n\nUSAGE:\n  ruprobe <SUBCOMMAND> [OPTIONS]\n\nCOMMANDS:\n  scan (s)    持续扫描：随机生成短链 ID，HEAD 探测存在性并落库\n  verify (v)  验证模式：对给定 ID 列表逐一探测全部扩展名\n  test (t)    发送能力评估(3s 窗口)，随机 ID HEAD 测试\n\n说明:\n  - 固定 worker 池 + 有界队列背压，连接复用 + DNS 缓存，SQLite/JSONL 落库((id, ext) 幂等)。\n  - 可选 relay 上报(带熔断)与 Prometheus /metrics 导出。\n\n快速示例:\n  ruprobe scan -c 128 --store-type sqlite -o hits.db\n  ruprobe scan -e png -e jpg --relay-url https://master.example/api/entry --relay-auth KEY\n  ruprobe verify abc123 xyz789 --store-type jsonl -o hits.jsonl\n  ruprobe test -b 10M",
    after_help = "完整用法速查\n\n通用参数 (scan/verify/test)：\n  -u, --url <URL>                  目标基础 URL (默认 https://files.catbox.moe/)\n  -e, --ext <EXT>...               扩展名(可重复，默认 png/jpg/jpeg/gif/webm/mp4)\n  -c, --concurrency <N>            worker 数(默认 64)\n      --timeout <SEC>              单请求超时(默认 6)\n      --log-level <LEVEL>          日志级别: error|warn|info|debug|silent (默认 info)\n\n扫描 scan 参数：\n      --id-len <N>                 随机 ID 长度(默认 6)\n      --charset <CHARS>            随机 ID 字母表(默认 a-z0-9)\n  -b, --band <EXPR>                速率上限: K/M/G、mbps/kbps、rps/krps 或纯数字 rps；0=不限速(默认 0)\n      --store-type <TYPE>          落库后端: sqlite/jsonl (默认 sqlite)\n  -o, --store <PATH>               落库路径(默认 ruprobe.db；jsonl 以 .gz 结尾自动 gzip)\n      --append                     jsonl 追加写入(默认覆盖)\n      --relay-url <URL>            上报 endpoint(可选)\n      --relay-auth <KEY>           上报 auth key(可选)\n      --metrics-port <PORT>        Prometheus /metrics 导出端口(可选)\n      --drain-timeout <SEC>        优雅退出等待在途探测的秒数(默认 5)\n      --no-progress                关闭屏幕进度\n      --progress-color             彩色进度\n\n验证 verify 参数：\n  [ID]... / --stdin / -f <PATH>    待验证 ID 来源\n      --store-type / -o / --append 同 scan\n\n测试 test 参数：\n  -b, --band <EXPR>                速率上限，同 scan\n\n示例：\n  ruprobe scan --id-len 6 -b 5M -o out.db --metrics-port 9090\n  ruprobe verify -f ids.txt --store-type jsonl -o v.jsonl.gz\n  ruprobe test -u https://files.catbox.moe/ -c 256\n"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 扫描 (scan) - 主流程：随机 ID 生成、HEAD 探测、落库、可选上报与指标导出
    #[command(alias = "s", after_help = "扫描参数分组:\n  目标: -u -e --timeout\n  生成: --id-len --charset\n  并发与速率: -c --band\n  落库: --store-type -o --append\n  上报: --relay-url --relay-auth\n  观测: --no-progress --progress-color --metrics-port\n  退出: --drain-timeout")]
    Scan(ScanArgs),
    /// 验证模式 (verify) - 对显式 ID 列表逐一探测并落库
    #[command(alias = "v", after_help = "验证参数: [ID]... --stdin -f -u -e -c --timeout --store-type -o --append")]
    Verify(VerifyArgs),
    /// 测试 (test) - 速率窗口(3s)随机 ID HEAD 查询评估近似发送能力
    #[command(alias = "t", after_help = "测试参数: -u -e -c --timeout -b\n输出示例: test-speed: window=3s sent=512 (~171 rps) hit=0 miss=498 errors=14")]
    Test(TestArgs),
}

/// Common args reused by multiple subcommands
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// 目标基础 URL
    #[arg(short = 'u', long = "url", default_value = "https://files.catbox.moe/")]
    pub base_url: String,

    /// 探测扩展名，可重复 (默认内置常见图片/视频扩展)
    #[arg(short = 'e', long = "ext")]
    pub exts: Vec<String>,

    /// worker 数
    #[arg(short = 'c', long = "concurrency", default_value_t = 64)]
    pub concurrency: usize,

    /// 单请求超时 (秒)
    #[arg(long = "timeout", default_value_t = 6)]
    pub timeout: u64,

    /// 日志级别: error|warn|info|debug|silent
    #[arg(long = "log-level", default_value = "info", value_parser = ["error", "warn", "info", "debug", "silent"])]
    pub log_level: String,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// 基本通用参数
    #[command(flatten)]
    pub common: CommonArgs,

    /// 随机 ID 长度
    #[arg(long = "id-len", default_value_t = 6)]
    pub id_len: usize,

    /// 随机 ID 字母表
    #[arg(long = "charset", default_value = crate::idgen::DEFAULT_CHARSET)]
    pub charset: String,

    /// 速率上限 (支持 K/M/G 后缀、mbps/kbps、rps/krps 或纯数字 rps；0=不限速)
    #[arg(short = 'b', long = "band", default_value = "0")]
    pub band: String,

    /// 落库后端: sqlite/jsonl
    #[arg(long = "store-type", default_value = "sqlite", value_parser = ["sqlite", "jsonl"])]
    pub store_type: String,

    /// 落库路径 (jsonl 以 .gz 结尾自动启用 gzip)
    #[arg(short = 'o', long = "store", default_value = "ruprobe.db")]
    pub store: PathBuf,

    /// jsonl 追加写入（默认覆盖写入）
    #[arg(long = "append")]
    pub append: bool,

    /// 发现结果异步上报 endpoint
    #[arg(long = "relay-url")]
    pub relay_url: Option<String>,

    /// 上报 auth key
    #[arg(long = "relay-auth")]
    pub relay_auth: Option<String>,

    /// Prometheus 文本格式导出端口 (不指定则不启动)
    #[arg(long = "metrics-port")]
    pub metrics_port: Option<u16>,

    /// 优雅退出时等待在途探测完成的秒数
    #[arg(long = "drain-timeout", default_value_t = 5)]
    pub drain_timeout: u64,

    /// 关闭屏幕进度
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// 彩色进度
    #[arg(long = "progress-color")]
    pub progress_color: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// 基本通用参数
    #[command(flatten)]
    pub common: CommonArgs,

    /// 位置参数 ID（可直接在命令后列出）
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// 从 stdin 读取 ID 列表
    #[arg(long = "stdin")]
    pub stdin: bool,

    /// 从文件读取 ID 列表
    #[arg(short = 'f', long = "filename")]
    pub filename: Option<PathBuf>,

    /// 落库后端: sqlite/jsonl
    #[arg(long = "store-type", default_value = "sqlite", value_parser = ["sqlite", "jsonl"])]
    pub store_type: String,

    /// 落库路径
    #[arg(short = 'o', long = "store", default_value = "ruprobe.db")]
    pub store: PathBuf,

    /// jsonl 追加写入
    #[arg(long = "append")]
    pub append: bool,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// 基本通用参数
    #[command(flatten)]
    pub common: CommonArgs,

    /// 速率上限，同 scan
    #[arg(short = 'b', long = "band", default_value = "0")]
    pub band: String,
}
