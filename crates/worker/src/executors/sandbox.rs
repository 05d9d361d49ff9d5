//! 单个任务使用的Lua解释器及其注入的全局函数
//!
//! 每个任务都会新建一个 [`Sandbox`]，脚本之间不共享任何状态。
//! 解释器只加载 `table`/`string`/`math`/`utf8`/`coroutine` 标准库，
//! 对外能力全部通过下列命名空间提供:
//!
//! | 全局变量 | 内容 |
//! |---|---|
//! | `task`   | 当前任务（只读） |
//! | `http`   | `get/post/put/delete`，返回 `{status, body, text, error}` |
//! | `crypto` | `md5/sha1/sha256` 十六进制摘要，`base64Encode/base64Decode` |
//! | `util`   | `sleep(ms)`、`uuid()`、`env(name)` |
//! | `str`    | 大小写转换、`trim`、`split/join/replace`、`contains/hasPrefix/hasSuffix` |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mlua::{
    Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, Table, Value,
    VmState,
};
use serde_json::{Map, Number};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// 脚本内HTTP调用的默认超时
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// 每执行这么多条指令检查一次截止时间
const DEADLINE_CHECK_INTERVAL: u32 = 1_000;

/// JSON嵌套深度上限，防止自引用的表导致无限递归
const MAX_DEPTH: usize = 64;

const READONLY_WRAPPER: &str = r#"
local proxies = ...
local function wrap(data)
    if type(data) ~= "table" then
        return data
    end
    local proxy = {}
    proxies[proxy] = data
    return setmetatable(proxy, {
        __index = function(_, key)
            return wrap(data[key])
        end,
        __newindex = function()
            error("task is read-only", 2)
        end,
        __len = function()
            return #data
        end,
        __pairs = function()
            return function(_, key)
                local next_key, value = next(data, key)
                return next_key, wrap(value)
            end, proxy, nil
        end,
        __metatable = false,
    })
end
return wrap
"#;

pub struct Sandbox {
    lua: Lua,
    /// 只读代理 -> 原始数据表
    proxies: Table,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
}

impl Sandbox {
    pub fn new(task: &serde_json::Value, timeout: Option<Duration>) -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
            LuaOptions::default(),
        )?;

        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = Arc::new(AtomicBool::new(false));

        if let Some(deadline) = deadline {
            let flag = timed_out.clone();
            // 超时后每次函数调用都会报错，包括 pcall 本身，因此错误无法被持续吞掉
            lua.set_hook(
                HookTriggers::new()
                    .on_calls()
                    .every_nth_instruction(DEADLINE_CHECK_INTERVAL),
                move |_lua, _debug| {
                    if flag.load(Ordering::SeqCst) || Instant::now() >= deadline {
                        flag.store(true, Ordering::SeqCst);
                        return Err(mlua::Error::runtime("script deadline exceeded"));
                    }
                    Ok(VmState::Continue)
                },
            );
        }

        let proxies = lua.create_table()?;
        let sandbox = Self {
            lua,
            proxies,
            deadline,
            timed_out,
        };
        sandbox.install_task(task)?;
        sandbox.install_http()?;
        sandbox.install_crypto()?;
        sandbox.install_util()?;
        sandbox.install_str()?;
        Ok(sandbox)
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// 执行脚本并把返回值转换为JSON；`None` 表示脚本没有返回值
    pub fn run(&self, name: &str, source: &str) -> mlua::Result<Option<serde_json::Value>> {
        let value: Value = self
            .lua
            .load(source)
            .set_name(format!("={name}"))
            .call(())?;
        match value {
            Value::Nil => Ok(None),
            other => to_json(&other, &self.proxies, 0).map(Some),
        }
    }

    fn install_task(&self, task: &serde_json::Value) -> mlua::Result<()> {
        let wrap: Function = self
            .lua
            .load(READONLY_WRAPPER)
            .set_name("=readonly")
            .call(self.proxies.clone())?;
        let data = to_lua(&self.lua, task)?;
        let proxy: Value = wrap.call(data)?;
        self.lua.globals().set("task", proxy)
    }

    fn install_http(&self) -> mlua::Result<()> {
        let http = self.lua.create_table()?;
        let client: Arc<OnceLock<reqwest::blocking::Client>> = Arc::new(OnceLock::new());

        for (name, method) in [
            ("get", reqwest::Method::GET),
            ("post", reqwest::Method::POST),
            ("put", reqwest::Method::PUT),
            ("delete", reqwest::Method::DELETE),
        ] {
            let client = client.clone();
            let proxies = self.proxies.clone();
            let deadline = self.deadline;
            let func = self.lua.create_function(
                move |lua, (url, headers, body): (String, Option<Table>, Option<Value>)| {
                    let request = HttpCall {
                        method: method.clone(),
                        url,
                        headers: header_pairs(headers)?,
                        body: request_body(body, &proxies)?,
                        timeout: remaining(deadline).map_or(HTTP_TIMEOUT, |r| r.min(HTTP_TIMEOUT)),
                    };
                    let client = client.get_or_init(reqwest::blocking::Client::new);
                    request.send(lua, client)
                },
            )?;
            http.set(name, func)?;
        }

        self.lua.globals().set("http", http)
    }

    fn install_crypto(&self) -> mlua::Result<()> {
        let lua = &self.lua;
        let crypto = lua.create_table()?;

        crypto.set(
            "md5",
            lua.create_function(|_, input: mlua::String| {
                Ok(format!("{:x}", md5::compute(&*input.as_bytes())))
            })?,
        )?;
        crypto.set(
            "sha1",
            lua.create_function(|_, input: mlua::String| {
                Ok(hex::encode(Sha1::digest(&*input.as_bytes())))
            })?,
        )?;
        crypto.set(
            "sha256",
            lua.create_function(|_, input: mlua::String| {
                Ok(hex::encode(Sha256::digest(&*input.as_bytes())))
            })?,
        )?;
        crypto.set(
            "base64Encode",
            lua.create_function(|_, input: mlua::String| Ok(STANDARD.encode(&*input.as_bytes())))?,
        )?;
        // 非法输入返回空字符串
        crypto.set(
            "base64Decode",
            lua.create_function(|lua, input: mlua::String| {
                let decoded = STANDARD.decode(&*input.as_bytes()).unwrap_or_default();
                lua.create_string(decoded)
            })?,
        )?;

        lua.globals().set("crypto", crypto)
    }

    fn install_util(&self) -> mlua::Result<()> {
        let lua = &self.lua;
        let util = lua.create_table()?;
        let deadline = self.deadline;

        util.set(
            "sleep",
            lua.create_function(move |_, ms: f64| {
                let requested = Duration::from_millis(ms.max(0.0) as u64);
                let duration = remaining(deadline).map_or(requested, |r| r.min(requested));
                std::thread::sleep(duration);
                Ok(())
            })?,
        )?;
        util.set(
            "uuid",
            lua.create_function(|_, ()| Ok(uuid::Uuid::new_v4().to_string()))?,
        )?;
        util.set(
            "env",
            lua.create_function(|_, name: String| Ok(std::env::var(name).unwrap_or_default()))?,
        )?;

        lua.globals().set("util", util)
    }

    fn install_str(&self) -> mlua::Result<()> {
        let lua = &self.lua;
        let strings = lua.create_table()?;

        strings.set("toUpper", lua.create_function(|_, s: String| Ok(s.to_uppercase()))?)?;
        strings.set("toLower", lua.create_function(|_, s: String| Ok(s.to_lowercase()))?)?;
        strings.set("trim", lua.create_function(|_, s: String| Ok(s.trim().to_string()))?)?;
        strings.set(
            "split",
            lua.create_function(|_, (s, sep): (String, String)| Ok(split(&s, &sep)))?,
        )?;
        strings.set(
            "join",
            lua.create_function(|_, (parts, sep): (Vec<String>, Option<String>)| {
                Ok(parts.join(sep.as_deref().unwrap_or("")))
            })?,
        )?;
        strings.set(
            "replace",
            lua.create_function(|_, (s, from, to): (String, String, String)| {
                Ok(if from.is_empty() { s } else { s.replace(&from, &to) })
            })?,
        )?;
        strings.set(
            "contains",
            lua.create_function(|_, (s, needle): (String, String)| Ok(s.contains(&needle)))?,
        )?;
        strings.set(
            "hasPrefix",
            lua.create_function(|_, (s, prefix): (String, String)| Ok(s.starts_with(&prefix)))?,
        )?;
        strings.set(
            "hasSuffix",
            lua.create_function(|_, (s, suffix): (String, String)| Ok(s.ends_with(&suffix)))?,
        )?;

        lua.globals().set("str", strings)
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// 空分隔符按字符拆分
fn split(s: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return s.chars().map(|c| c.to_string()).collect();
    }
    s.split(sep).map(str::to_string).collect()
}

struct HttpCall {
    method: reqwest::Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    timeout: Duration,
}

enum RequestBody {
    Text(Vec<u8>),
    Json(serde_json::Value),
}

impl HttpCall {
    /// 传输层错误不会抛到脚本中，而是返回 `status = 0` 和 `error`
    fn send(self, lua: &Lua, client: &reqwest::blocking::Client) -> mlua::Result<Table> {
        let mut builder = client.request(self.method, &self.url).timeout(self.timeout);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder = match self.body {
            Some(RequestBody::Text(bytes)) => builder.body(bytes),
            Some(RequestBody::Json(json)) => builder.json(&json),
            None => builder,
        };

        let response = lua.create_table()?;
        match builder.send().and_then(|r| {
            let status = r.status().as_u16();
            r.text().map(|text| (status, text))
        }) {
            Ok((status, text)) => {
                response.set("status", status)?;
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                    response.set("body", to_lua(lua, &json)?)?;
                }
                response.set("text", text)?;
            }
            Err(e) => {
                response.set("status", 0)?;
                response.set("text", "")?;
                response.set("error", e.to_string())?;
            }
        }
        Ok(response)
    }
}

fn header_pairs(headers: Option<Table>) -> mlua::Result<Vec<(String, String)>> {
    let Some(headers) = headers else {
        return Ok(Vec::new());
    };
    let pairs = headers.pairs::<String, String>().collect::<mlua::Result<Vec<_>>>();
    pairs
}

fn request_body(body: Option<Value>, proxies: &Table) -> mlua::Result<Option<RequestBody>> {
    Ok(match body {
        None | Some(Value::Nil) => None,
        Some(Value::String(s)) => Some(RequestBody::Text(s.as_bytes().to_vec())),
        Some(other) => Some(RequestBody::Json(to_json(&other, proxies, 0)?)),
    })
}

/// JSON -> Lua，`null` 映射为 `nil`
pub fn to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    lua.to_value_with(
        value,
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false),
    )
}

/// Lua -> JSON
///
/// 连续整数键 `1..n` 的表转换为数组，其余表转换为对象；空表视为对象。
/// 只读代理会先还原为其背后的数据表。
pub fn to_json(value: &Value, proxies: &Table, depth: usize) -> mlua::Result<serde_json::Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("value is nested too deeply to convert to JSON"));
    }

    Ok(match value {
        Value::Nil => serde_json::Value::Null,
        Value::LightUserData(ud) if ud.0.is_null() => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Number(n) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy().to_string()),
        Value::Table(table) => {
            let table = match proxies.raw_get::<Value>(table.clone())? {
                Value::Table(data) => data,
                _ => table.clone(),
            };

            let mut entries = Vec::new();
            for pair in table.pairs::<Value, Value>() {
                entries.push(pair?);
            }

            let len = table.raw_len();
            if len > 0 && entries.len() == len {
                let mut items = Vec::with_capacity(len);
                for index in 1..=len {
                    let item: Value = table.raw_get(index)?;
                    items.push(to_json(&item, proxies, depth + 1)?);
                }
                serde_json::Value::Array(items)
            } else {
                let mut object = Map::new();
                for (key, item) in entries {
                    let key = match key {
                        Value::String(s) => s.to_string_lossy().to_string(),
                        Value::Integer(i) => i.to_string(),
                        Value::Number(n) => n.to_string(),
                        other => {
                            return Err(mlua::Error::runtime(format!(
                                "cannot use {} as a JSON object key",
                                other.type_name()
                            )))
                        }
                    };
                    object.insert(key, to_json(&item, proxies, depth + 1)?);
                }
                serde_json::Value::Object(object)
            }
        }
        other => {
            return Err(mlua::Error::runtime(format!(
                "cannot convert {} to JSON",
                other.type_name()
            )))
        }
    })
}
