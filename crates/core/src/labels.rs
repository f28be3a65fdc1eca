//! User-facing strings of the console. The service and its users work in Chinese.

pub const WORKSPACE_TAB_NAME: &str = "工作区";
pub const APP_PLACEHOLDER: &str = "产品";
pub const VERSION_PLACEHOLDER: &str = "版本";

pub const SELECT_APP: &str = "请选择产品";
pub const SELECT_VERSION: &str = "请选择版本";
pub const ENTER_SQL: &str = "请输入sql语句";
pub const ENTER_NAME: &str = "请输入名称";

pub const SQL_SYNTAX_PREFIX: &str = "参数错误,查询不符合sql的语法:";
pub const UNAUTHORIZED: &str = "用户Id不存在";
pub const FORBIDDEN: &str = "没有操作权限";
pub const NOT_FOUND: &str = "该id不存在";
pub const SERVER_UNREACHABLE: &str = "服务器已停止或服务器没有响应";
pub const SERVER_ERROR: &str = "服务器错误";

pub const LOADING: &str = "加载中...";
pub const NO_RECORDS: &str = "无记录";
pub const NO_DOWNLOAD: &str = "无可下载的记录";
pub const NO_SAMPLES: &str = "暂无数据";
pub const SAMPLES_TITLE: &str = "前十条参考数据";
pub const ELAPSED_PREFIX: &str = "本次查询执行时间：";

pub const SAVED_TITLE: &str = "常用查询";
pub const SAVED_EMPTY: &str = "暂时没有常用查询";
pub const SAVED_OK: &str = "保存成功";
pub const SAVED_DUPLICATE: &str = "已经有该名称了，请重新输入";
pub const SAVED_UNAUTHORIZED: &str = "用户Id不正确";
pub const DELETED_OK: &str = "删除成功";
pub const DELETE_UNKNOWN_USER: &str = "该用户不存在";

pub const HISTORY_TITLE: &str = "历史查询";
pub const STATUS_SUCCEEDED: &str = "成功";
pub const STATUS_FAILED: &str = "失败";
pub const STATUS_RUNNING: &str = "运行中";
pub const SECONDS_SUFFIX: &str = " 秒";

pub const COLLECTORS_TITLE: &str = "数据收集器";
pub const COLLECTOR_ADDED: &str = "添加成功";
pub const COLLECTOR_MISSING: &str = "该收集器不存在";
pub const COLLECTOR_DUPLICATE: &str = "重复的收集器名称或url";
pub const COLLECTOR_NOT_EDITABLE: &str = "只有未同步的收集器可以修改路径";
pub const COLLECTOR_NAME_REQUIRED: &str = "请输入收集器名称";
pub const COLLECTOR_URL_REQUIRED: &str = "请输入收集器地址";
pub const NOT_SYNCED_CELL: &str = "--";

#[must_use]
pub fn record_count_caption(total: u64) -> String {
    format!("共 {total} 条记录")
}
