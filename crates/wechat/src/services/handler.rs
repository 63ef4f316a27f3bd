//! Chat-channel business logic.
//!
//! Recognizes the chat commands (help, binding, book selection) and
//! statistics questions, and forwards everything else that looks like a
//! bookkeeping entry to the inference service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tracing::{debug, instrument};

use zhiweijz_core::ExternalId;

use super::{InferenceInput, InferenceRequest, InferenceService, StatsQuery, intent};
use crate::binding::{BindingService, BookChoice};
use crate::dispatch::{HandlerError, MessageHandler};
use crate::models::AccountBook;
use crate::wechat::{EventKind, InboundMessage, MessagePayload};

const HELP: &str = "📖 使用帮助\n\n\
🔗 账号管理：\n\
• \"绑定账号\" - 获取绑定链接\n\
• \"绑定信息\" - 查看当前绑定信息\n\
• \"解除绑定\" - 取消账号绑定\n\n\
📚 账本管理：\n\
• \"设置账本\" - 查看并选择默认账本\n\
• \"选择1\" / \"选择账本1\" - 选择第1个账本为默认\n\n\
📊 统计查询：\n\
• \"查看余额\" / \"账本统计\" - 查询账本统计\n\
• \"分类统计\" / \"消费统计\" - 查看分类统计\n\
• \"预算还剩多少\" - 查看预算执行情况\n\
• \"最近10笔记录\" - 查看最近的交易\n\
• \"本月花了多少\" / \"上周支出\" - 按时间统计\n\n\
💡 智能记账示例：\n\
• \"50 餐饮 午餐\" - 支出记账\n\
• \"地铁 5元\" - 交通费用\n\
• \"工资 8000\" - 收入记账\n\
• \"买菜花了30块钱\" - 自然语言记账\n\n\
如有问题，请联系客服。";

const WELCOME: &str = "🎉 欢迎关注只为记账！\n\n\
我是您的智能记账助手，可以帮您：\n\
📝 智能记账 - 发送消费信息即可自动记账\n\
💰 查看余额 - 随时了解财务状况\n\
📊 账本管理 - 切换不同账本\n\n\
请先点击菜单\"账号绑定\"开始使用！";

const EMPTY_TEXT: &str = "请发送有效的消息内容。\n\n发送\"帮助\"查看使用说明。";
const NO_DEFAULT_BOOK: &str = "请先设置默认账本。\n\n发送\"设置账本\"来选择默认账本。";
const NOT_ACCOUNTING: &str =
    "这似乎不是记账信息。\n\n请发送记账信息，例如：\"50 餐饮 午餐\"，或发送\"帮助\"查看使用说明。";
const NOT_BOUND: &str = "您还未绑定账号。发送\"绑定账号\"获取绑定说明。";
const NO_BOOKS: &str = "您还没有任何账本，请先在应用中创建账本。";
const INFERENCE_UNAVAILABLE: &str = "智能记账服务暂未开启，请稍后再试。";
const UNSUPPORTED: &str =
    "抱歉，暂不支持此类型消息。\n\n请发送文字消息进行记账，或发送\"帮助\"查看使用说明。";
const CREDENTIALS_IN_CHAT: &str =
    "⚠️ 为了您的账号安全，请不要在聊天中发送邮箱和密码。\n\n请通过下方链接完成绑定：";
const BALANCE_NEEDS_BINDING: &str = "请先绑定账号并设置默认账本。";
const CLICK_THANKS: &str = "感谢您的操作！";
const VIEW_THANKS: &str = "感谢您的访问！如需记账，请直接发送消息。";
const SCAN_WELCOME: &str = "扫码成功！欢迎使用只为记账智能记账服务。\n\n发送\"帮助\"查看使用说明。";
const LOCATION_UNSUPPORTED: &str =
    "收到您的位置信息，但暂不支持基于位置的记账功能。\n\n请发送文字消息进行记账。";
const OTHER_EVENT: &str = "感谢您的操作！\n\n如需记账，请发送消息，或发送\"帮助\"查看使用说明。";

/// Keywords that mark small talk rather than a bookkeeping entry.
const NON_ACCOUNTING_KEYWORDS: &[&str] = &[
    "你好", "hello", "hi", "在吗", "在不在", "怎么样", "如何", "什么时候", "为什么", "天气",
    "新闻", "股票", "彩票", "聊天", "无聊", "哈哈", "呵呵", "测试", "test", "试试", "谢谢",
    "感谢", "thanks", "再见", "bye", "拜拜",
];

/// A recognized chat command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    /// `绑定 邮箱 密码`; binding only happens on the binding page
    CredentialsInChat,
    BindInstructions,
    BindingInfo,
    Unbind,
    ListBooks,
    ChooseBook(usize),
}

impl Command {
    fn parse(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["帮助", "help"]) || text == "?" || text == "？" {
            Some(Self::Help)
        } else if text
            .strip_prefix("绑定")
            .is_some_and(|rest| rest.starts_with(char::is_whitespace) && rest.contains('@'))
        {
            Some(Self::CredentialsInChat)
        } else if has(&["绑定账号", "账号绑定"]) {
            Some(Self::BindInstructions)
        } else if has(&["绑定信息", "我的绑定"]) {
            Some(Self::BindingInfo)
        } else if has(&["解除绑定", "取消绑定"]) {
            Some(Self::Unbind)
        } else if let Some(position) = text
            .strip_prefix("选择")
            .map(|rest| rest.trim_start().strip_prefix("账本").unwrap_or(rest))
            .and_then(|rest| rest.trim().parse::<usize>().ok())
        {
            Some(Self::ChooseBook(position))
        } else if has(&["设置账本", "选择账本"]) {
            Some(Self::ListBooks)
        } else {
            None
        }
    }
}

/// Whether `text` is small talk rather than a bookkeeping entry.
fn is_non_accounting(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_keyword = NON_ACCOUNTING_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_digits = text.chars().any(|c| c.is_ascii_digit());
    let length = text.chars().count();
    let only_letters = text
        .chars()
        .all(|c| c.is_ascii_alphabetic() || c.is_whitespace());

    has_keyword || (length < 3 && !has_digits) || (only_letters && length < 10)
}

/// Format a timestamp in China Standard Time (UTC+8).
fn beijing_time(at: DateTime<Utc>) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M";
    FixedOffset::east_opt(8 * 3600).map_or_else(
        || at.format(FORMAT).to_string(),
        |tz| at.with_timezone(&tz).format(FORMAT).to_string(),
    )
}

/// Today's date in China Standard Time.
fn beijing_today(now: DateTime<Utc>) -> NaiveDate {
    FixedOffset::east_opt(8 * 3600).map_or_else(
        || now.date_naive(),
        |tz| now.with_timezone(&tz).date_naive(),
    )
}

fn book_listing(books: &[AccountBook]) -> String {
    let mut message = String::from("请选择要设置为默认的账本：\n\n");
    for (i, book) in books.iter().enumerate() {
        message.push_str(&format!("{}. {} {}\n", i + 1, book.name, book.kind_label()));
    }
    message.push_str("\n回复数字选择账本，例如：选择1");
    message
}

/// Handles chat deliveries for the official account.
#[derive(Clone)]
pub struct WechatMessageHandler {
    bindings: BindingService,
    inference: Option<Arc<dyn InferenceService>>,
    /// Public base URL, for the binding link
    base_url: String,
}

impl WechatMessageHandler {
    #[must_use]
    pub fn new(
        bindings: BindingService,
        inference: Option<Arc<dyn InferenceService>>,
        base_url: &str,
    ) -> Self {
        Self {
            bindings,
            inference,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn bind_instructions(&self) -> String {
        format!(
            "🔗 账号绑定说明\n\n\
             请点击下方链接，在页面中登录只为记账账号并选择默认账本：\n\
             {}/bind\n\n\
             ⚠️ 注意：\n\
             • 请在微信内打开链接\n\
             • 请使用您在只为记账应用中注册的邮箱和密码\n\n\
             如需帮助，请发送\"帮助\"",
            self.base_url
        )
    }

    async fn command(&self, sender: &ExternalId, command: Command) -> Result<String, HandlerError> {
        let reply = match command {
            Command::Help => HELP.to_string(),
            Command::CredentialsInChat => {
                format!("{CREDENTIALS_IN_CHAT}\n{}/bind", self.base_url)
            }
            Command::BindInstructions => self.bind_instructions(),
            Command::BindingInfo => self.binding_info(sender).await?,
            Command::Unbind => {
                if self.bindings.unbind_from_chat(sender).await? {
                    "已成功解除绑定".to_string()
                } else {
                    NOT_BOUND.to_string()
                }
            }
            Command::ListBooks => match self.bindings.books_for(sender).await? {
                None => self.bind_instructions(),
                Some(books) if books.is_empty() => NO_BOOKS.to_string(),
                Some(books) => book_listing(&books),
            },
            Command::ChooseBook(position) => match self.bindings.choose_book(sender, position).await? {
                BookChoice::NotBound => self.bind_instructions(),
                BookChoice::OutOfRange { available: 0 } => NO_BOOKS.to_string(),
                BookChoice::OutOfRange { available } => {
                    format!("选择的账本编号无效。请选择1-{available}之间的数字。")
                }
                BookChoice::Chosen(book) => format!("已设置\"{}\"为默认账本", book.name),
            },
        };
        Ok(reply)
    }

    async fn binding_info(&self, sender: &ExternalId) -> Result<String, HandlerError> {
        let Some(summary) = self.bindings.summary(sender).await? else {
            return Ok(NOT_BOUND.to_string());
        };

        let (name, email) = summary.user.map_or_else(
            || ("未知用户".to_string(), String::new()),
            |u| (u.display_name(), u.email.masked()),
        );
        let book = summary.book.map_or_else(|| "未设置".to_string(), |b| b.name);
        let bound_at = beijing_time(summary.binding.created_at);

        Ok(format!(
            "📋 绑定信息\n\n用户：{name}\n邮箱：{email}\n默认账本：{book}\n绑定时间：{bound_at}\n\n\
             发送\"解除绑定\"可以取消绑定"
        ))
    }

    /// Forward input to the inference service for the sender's default book.
    async fn account(&self, sender: &ExternalId, input: InferenceInput) -> Result<String, HandlerError> {
        let Some(binding) = self.bindings.active_binding(sender).await? else {
            return Ok(self.bind_instructions());
        };
        let Some(account_book_id) = binding.account_book_id else {
            return Ok(NO_DEFAULT_BOOK.to_string());
        };
        let Some(inference) = &self.inference else {
            return Ok(INFERENCE_UNAVAILABLE.to_string());
        };

        let reply = inference
            .interpret(InferenceRequest {
                user_id: binding.user_id,
                account_book_id,
                input,
            })
            .await?;
        Ok(reply)
    }

    async fn text(&self, sender: &ExternalId, content: &str) -> Result<String, HandlerError> {
        let text = content.trim();
        if text.is_empty() {
            return Ok(EMPTY_TEXT.to_string());
        }
        if let Some(command) = Command::parse(text) {
            debug!(?command, "Chat command");
            return self.command(sender, command).await;
        }
        if let Some(query) = intent::recognize(text, beijing_today(Utc::now())) {
            debug!(query = query.as_str(), "Statistics query");
            return self.account(sender, InferenceInput::Query(query)).await;
        }
        if is_non_accounting(text) {
            return Ok(NOT_ACCOUNTING.to_string());
        }
        self.account(sender, InferenceInput::Text(text.to_string()))
            .await
    }

    async fn event(
        &self,
        sender: &ExternalId,
        event: &EventKind,
        key: Option<&str>,
    ) -> Result<Option<String>, HandlerError> {
        let reply = match event {
            EventKind::Subscribe => WELCOME.to_string(),
            EventKind::Unsubscribe => return Ok(None),
            EventKind::Click => match key {
                Some("BIND_ACCOUNT") => self.bind_instructions(),
                Some("HELP") => HELP.to_string(),
                Some("BALANCE") => match self.bindings.active_binding(sender).await? {
                    Some(b) if b.account_book_id.is_some() => {
                        self.account(sender, InferenceInput::Query(StatsQuery::Balance))
                            .await?
                    }
                    _ => BALANCE_NEEDS_BINDING.to_string(),
                },
                _ => CLICK_THANKS.to_string(),
            },
            EventKind::View => VIEW_THANKS.to_string(),
            EventKind::Scan => SCAN_WELCOME.to_string(),
            EventKind::Location => LOCATION_UNSUPPORTED.to_string(),
            EventKind::Other(_) => OTHER_EVENT.to_string(),
        };
        Ok(Some(reply))
    }
}

#[async_trait]
impl MessageHandler for WechatMessageHandler {
    #[instrument(skip(self, message), fields(kind = %message.kind()))]
    async fn handle(&self, message: &InboundMessage) -> Result<Option<String>, HandlerError> {
        let sender = &message.external_id;
        let reply = match &message.payload {
            MessagePayload::Text { content } => self.text(sender, content).await?,
            MessagePayload::Voice {
                media_id,
                recognition,
                ..
            } => {
                let input = InferenceInput::Voice {
                    media_id: media_id.clone(),
                    transcription: recognition.clone().filter(|r| !r.trim().is_empty()),
                };
                self.account(sender, input).await?
            }
            MessagePayload::Image { pic_url, media_id } => {
                let input = InferenceInput::Image {
                    url: pic_url.clone(),
                    media_id: media_id.clone(),
                };
                self.account(sender, input).await?
            }
            MessagePayload::Event { event, key } => {
                return self.event(sender, event, key.as_deref()).await;
            }
            MessagePayload::Other { .. } => UNSUPPORTED.to_string(),
        };
        Ok(Some(reply))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::Datelike;
    use secrecy::SecretString;
    use tokio::sync::Mutex;

    use super::*;
    use crate::binding::TicketSigner;
    use crate::binding::tests::FakeAccounts;
    use crate::db::{BindingStore, MemoryBindingStore};
    use crate::models::BindingWrite;
    use crate::services::{CollaboratorError, Period};

    #[derive(Default)]
    struct RecordingInference {
        requests: Mutex<Vec<InferenceRequest>>,
    }

    #[async_trait]
    impl InferenceService for RecordingInference {
        async fn interpret(&self, request: InferenceRequest) -> Result<String, CollaboratorError> {
            self.requests.lock().await.push(request);
            Ok("记账成功：餐饮 35元".to_string())
        }
    }

    struct Fixture {
        handler: WechatMessageHandler,
        store: Arc<MemoryBindingStore>,
        accounts: Arc<FakeAccounts>,
        inference: Arc<RecordingInference>,
        user: zhiweijz_core::UserId,
        openid: ExternalId,
    }

    fn fixture() -> Fixture {
        let (accounts, user) =
            FakeAccounts::default().with_user("张三", "zhangsan@qq.com", &["日常开销", "旅行"]);
        let accounts = Arc::new(accounts);
        let store = Arc::new(MemoryBindingStore::new());
        let inference = Arc::new(RecordingInference::default());
        let bindings = BindingService::new(
            store.clone(),
            accounts.clone(),
            accounts.clone(),
            TicketSigner::new(&SecretString::from("k8#mQ2$vL9@nR4&wX7*pT1!zY6^bH3%")).unwrap(),
        );

        Fixture {
            handler: WechatMessageHandler::new(
                bindings,
                Some(inference.clone()),
                "https://wx.zhiweijz.cn/",
            ),
            store,
            accounts,
            inference,
            user,
            openid: ExternalId::parse("openid-user-1").unwrap(),
        }
    }

    impl Fixture {
        async fn bind(&self, with_book: bool) {
            let book = with_book.then(|| self.accounts.book(self.user, 0).id);
            self.store
                .save(
                    BindingWrite {
                        external_id: self.openid.clone(),
                        user_id: self.user,
                        account_book_id: book,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        async fn send(&self, payload: MessagePayload) -> Option<String> {
            let message = InboundMessage {
                message_id: Some("1001".to_string()),
                external_id: self.openid.clone(),
                account_id: "gh_account".to_string(),
                created_at: Some(1_700_000_000),
                payload,
            };
            self.handler.handle(&message).await.unwrap()
        }

        async fn text(&self, content: &str) -> String {
            self.send(MessagePayload::Text {
                content: content.to_string(),
            })
            .await
            .unwrap()
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("帮助"), Some(Command::Help));
        assert_eq!(Command::parse("HELP"), Some(Command::Help));
        assert_eq!(Command::parse("？"), Some(Command::Help));
        assert_eq!(Command::parse("选择账本"), Some(Command::ListBooks));
        assert_eq!(Command::parse("设置账本"), Some(Command::ListBooks));
        assert_eq!(Command::parse("选择2"), Some(Command::ChooseBook(2)));
        assert_eq!(Command::parse("选择 3"), Some(Command::ChooseBook(3)));
        assert_eq!(Command::parse("选择账本2"), Some(Command::ChooseBook(2)));
        assert_eq!(Command::parse("选择账本 1"), Some(Command::ChooseBook(1)));
        assert_eq!(
            Command::parse("绑定 zhangsan@qq.com hunter22"),
            Some(Command::CredentialsInChat)
        );
        assert_eq!(Command::parse("绑定账号"), Some(Command::BindInstructions));
        assert_eq!(Command::parse("分类统计"), None);
        assert_eq!(Command::parse("午餐 35"), None);
        assert_eq!(Command::parse("选择困难"), None);
    }

    #[test]
    fn test_beijing_today_crosses_midnight() {
        let late_utc = DateTime::parse_from_rfc3339("2026-03-10T17:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            beijing_today(late_utc),
            NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()
        );
    }

    #[test]
    fn test_non_accounting_detection() {
        assert!(is_non_accounting("你好"));
        assert!(is_non_accounting("ok"));
        assert!(is_non_accounting("good job"));
        assert!(is_non_accounting("谢谢 50"));
        assert!(!is_non_accounting("午餐 35"));
        assert!(!is_non_accounting("买菜花了三十块钱"));
        assert!(!is_non_accounting("45"));
    }

    #[tokio::test]
    async fn test_unbound_user_gets_bind_link() {
        let f = fixture();
        let reply = f.text("午餐 35").await;
        assert!(reply.contains("https://wx.zhiweijz.cn/bind"));
        assert!(f.inference.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_bound_text_goes_to_inference() {
        let f = fixture();
        f.bind(true).await;

        assert_eq!(f.text("午餐 35").await, "记账成功：餐饮 35元");
        let requests = f.inference.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_id, f.user);
        assert_eq!(requests[0].input, InferenceInput::Text("午餐 35".to_string()));
    }

    #[tokio::test]
    async fn test_missing_default_book() {
        let f = fixture();
        f.bind(false).await;
        assert_eq!(f.text("午餐 35").await, NO_DEFAULT_BOOK);
    }

    #[tokio::test]
    async fn test_small_talk_is_not_recorded() {
        let f = fixture();
        f.bind(true).await;
        assert_eq!(f.text("你好").await, NOT_ACCOUNTING);
        assert!(f.inference.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_choose_book() {
        let f = fixture();
        f.bind(true).await;

        let listing = f.text("设置账本").await;
        assert!(listing.contains("1. 日常开销 [个人账本]"));
        assert!(listing.contains("2. 旅行 [个人账本]"));

        assert_eq!(f.text("选择2").await, "已设置\"旅行\"为默认账本");
        assert_eq!(
            f.text("选择5").await,
            "选择的账本编号无效。请选择1-2之间的数字。"
        );

        let info = f.text("绑定信息").await;
        assert!(info.contains("用户：张三"));
        assert!(info.contains("邮箱：z***n@qq.com"));
        assert!(info.contains("默认账本：旅行"));
    }

    #[tokio::test]
    async fn test_choose_book_with_book_word() {
        let f = fixture();
        f.bind(true).await;

        assert_eq!(f.text("选择账本2").await, "已设置\"旅行\"为默认账本");
        let binding = f.store.find(&f.openid).await.unwrap().unwrap();
        assert_eq!(binding.account_book_id, Some(f.accounts.book(f.user, 1).id));
    }

    #[tokio::test]
    async fn test_statistics_queries() {
        let f = fixture();
        f.bind(true).await;

        f.text("分类统计").await;
        f.text("预算还剩多少").await;
        f.text("最近10笔记录").await;
        f.text("本月花了多少").await;

        let requests = f.inference.requests.lock().await;
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].input, InferenceInput::Query(StatsQuery::Categories));
        assert_eq!(requests[1].input, InferenceInput::Query(StatsQuery::Budget));
        assert_eq!(
            requests[2].input,
            InferenceInput::Query(StatsQuery::Recent { limit: 10 })
        );
        let InferenceInput::Query(StatsQuery::TimeRange { start, end, period }) = &requests[3].input
        else {
            panic!("expected a time range query, got {:?}", requests[3].input);
        };
        assert_eq!(*period, Period::Month);
        assert_eq!(*start, end.with_day(1).unwrap());
    }

    #[tokio::test]
    async fn test_statistics_query_needs_binding() {
        let f = fixture();
        let reply = f.text("预算还剩多少").await;
        assert!(reply.contains("https://wx.zhiweijz.cn/bind"));
        assert!(f.inference.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_credentials_in_chat_are_not_forwarded() {
        let f = fixture();
        f.bind(true).await;

        let reply = f.text("绑定 zhangsan@qq.com hunter22").await;
        assert!(reply.starts_with(CREDENTIALS_IN_CHAT));
        assert!(reply.contains("https://wx.zhiweijz.cn/bind"));
        assert!(!reply.contains("hunter22"));
        assert!(f.inference.requests.lock().await.is_empty());

        let binding = f.store.find(&f.openid).await.unwrap().unwrap();
        assert_eq!(binding.user_id, f.user);
        assert_eq!(binding.version, 1);
    }

    #[tokio::test]
    async fn test_unbind_from_chat() {
        let f = fixture();
        f.bind(true).await;

        assert_eq!(f.text("解除绑定").await, "已成功解除绑定");
        assert_eq!(f.text("解除绑定").await, NOT_BOUND);
        assert!(!f.store.find(&f.openid).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_voice_uses_recognition() {
        let f = fixture();
        f.bind(true).await;
        f.send(MessagePayload::Voice {
            media_id: Some("media-1".to_string()),
            format: Some("amr".to_string()),
            recognition: Some("打车二十元".to_string()),
        })
        .await;

        let requests = f.inference.requests.lock().await;
        assert_eq!(
            requests[0].input,
            InferenceInput::Voice {
                media_id: Some("media-1".to_string()),
                transcription: Some("打车二十元".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_events() {
        let f = fixture();
        let event = |event: EventKind, key: Option<&str>| MessagePayload::Event {
            event,
            key: key.map(str::to_string),
        };

        assert_eq!(f.send(event(EventKind::Subscribe, None)).await.as_deref(), Some(WELCOME));
        assert_eq!(f.send(event(EventKind::Unsubscribe, None)).await, None);
        assert_eq!(
            f.send(event(EventKind::Click, Some("BALANCE"))).await.as_deref(),
            Some(BALANCE_NEEDS_BINDING)
        );
        assert_eq!(
            f.send(event(EventKind::Click, Some("UNKNOWN"))).await.as_deref(),
            Some(CLICK_THANKS)
        );

        f.bind(true).await;
        f.send(event(EventKind::Click, Some("BALANCE"))).await;
        assert_eq!(
            f.inference.requests.lock().await[0].input,
            InferenceInput::Query(StatsQuery::Balance)
        );
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let f = fixture();
        let reply = f
            .send(MessagePayload::Other {
                msg_type: "video".to_string(),
            })
            .await;
        assert_eq!(reply.as_deref(), Some(UNSUPPORTED));
    }
}
