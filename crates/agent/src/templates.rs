//! Localized reply texts.
//!
//! Every user-facing sentence is a tera template registered as
//! `<language>/<name>`. A template missing in one language falls back to
//! English so a partial translation never breaks a turn.

use std::collections::HashMap;

use tera::{Context, Tera};
use thiserror::Error;

use leadline_core::domain::conversation::Language;
use leadline_core::errors::ApplicationError;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` failed: {message}")]
    Render { name: String, message: String },
    #[error("template set failed to load: {0}")]
    Load(String),
}

impl From<TemplateError> for ApplicationError {
    fn from(value: TemplateError) -> Self {
        ApplicationError::Configuration(value.to_string())
    }
}

pub struct ReplyTemplates {
    tera: Tera,
}

impl ReplyTemplates {
    pub fn embedded() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        for (language, table) in
            [(Language::English, ENGLISH), (Language::Russian, RUSSIAN), (Language::Arabic, ARABIC)]
        {
            let named = table
                .iter()
                .map(|(name, body)| (format!("{}/{name}", language.code()), *body))
                .collect::<Vec<_>>();
            tera.add_raw_templates(named).map_err(|error| TemplateError::Load(error.to_string()))?;
        }
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        language: Language,
        name: &str,
        context: &Context,
    ) -> Result<String, TemplateError> {
        let localized = format!("{}/{name}", language.code());
        let template = if self.has(&localized) {
            localized
        } else {
            format!("{}/{name}", Language::English.code())
        };
        self.tera
            .render(&template, context)
            .map(|text| text.trim().to_string())
            .map_err(|error| TemplateError::Render { name: template, message: error.to_string() })
    }

    pub fn text(&self, language: Language, name: &str) -> Result<String, TemplateError> {
        self.render(language, name, &Context::new())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|registered| registered == name)
    }
}

/// `grouped`: `2950000` -> `2,950,000`; any fractional part is kept as-is.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("grouped", grouped_filter);
}

fn grouped_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let raw = match value {
        tera::Value::String(text) => text.clone(),
        tera::Value::Number(number) => number.to_string(),
        _ => return Err(tera::Error::msg("grouped filter expects a number or numeric string")),
    };
    Ok(tera::Value::String(group_digits(&raw)))
}

pub fn group_digits(raw: &str) -> String {
    let (sign, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw),
    };
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction.trim_end_matches('0'))),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    match fraction.filter(|fraction| !fraction.is_empty()) {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

const ENGLISH: &[(&str, &str)] = &[
    ("greeting", "Hi! I'm the {{ agency }} property assistant. I'll help you find the right home in a few quick questions."),
    ("help", "You can tell me what you are looking for in your own words, e.g. \"2-bedroom apartment in Dubai Marina up to 2 million\".\nCommands: /start to begin, /restart to start over, /stop to stop messages."),
    ("goal_prompt", "Are you looking to buy, rent or invest?"),
    ("ask_budget", "What budget do you have in mind{% if currency %} ({{ currency }}){% endif %}?"),
    ("ask_property_type", "What type of property are you looking for?"),
    ("ask_location", "Which area or community do you prefer?"),
    ("ask_bedrooms", "How many bedrooms do you need?"),
    ("ask_amenities", "Any must-have amenities, like a pool, gym or parking?"),
    ("extraction_fallback", "Sorry, I didn't quite catch that. Please choose one of the options below."),
    ("objection_price", "I understand, price matters. We have options across different budgets and flexible payment plans, so let's find something that fits."),
    ("objection_timing", "No rush at all. I can keep you posted on new listings so you're ready when the timing is right."),
    ("objection_uncertainty", "That's completely normal. Exploring a few options is the best way to find out what you really want, with no obligation."),
    ("matches_exact", "Here {% if count == 1 %}is 1 property{% else %}are {{ count }} properties{% endif %} that fit your brief:"),
    ("matches_widened", "Nothing matched exactly, so I widened the budget a little. Here is what I found:"),
    ("matches_closest", "These are the closest alternatives around your budget:"),
    ("matches_none", "I don't have listings in your budget right now. An agent will reach out as soon as something comes up."),
    ("match_item", "{{ index }}. {{ title }}: {{ currency }} {{ price | grouped }}, {{ location }}{% if bedrooms > 0 %}, {{ bedrooms }} BR{% else %}, studio{% endif %}"),
    ("offer_consultation", "Would you like a free consultation with one of our agents?"),
    ("consultation_confirmed", "Great, an agent will contact you shortly to arrange a consultation."),
    ("request_contact", "Please share your phone number so the agent can reach you."),
    ("contact_received", "Thank you{% if name %}, {{ name }}{% endif %}! We have your contact details."),
    ("stopped", "Understood, I won't message you again. Send /start whenever you want to continue."),
    ("degraded", "Sorry, something went wrong on our side. Please try again in a moment."),
    ("ghost_reminder", "Hi{% if name %} {{ name }}{% endif %}! Are you still looking for a property? New listings have come in and I'd be happy to share the ones that match what you told me."),
    ("label_buy", "Buy"),
    ("label_rent", "Rent"),
    ("label_invest", "Invest"),
    ("label_consult", "Book a consultation"),
    ("label_more", "More options"),
    ("label_apartment", "Apartment"),
    ("label_villa", "Villa"),
    ("label_townhouse", "Townhouse"),
    ("label_penthouse", "Penthouse"),
    ("label_studio", "Studio"),
    ("label_pool", "Pool"),
    ("label_gym", "Gym"),
    ("label_parking", "Parking"),
    ("label_sea_view", "Sea view"),
];

const RUSSIAN: &[(&str, &str)] = &[
    ("greeting", "Здравствуйте! Я помощник {{ agency }} по недвижимости. Задам пару вопросов и подберу подходящие варианты."),
    ("help", "Опишите, что ищете, своими словами, например: \"квартира с 2 спальнями в Dubai Marina до 2 млн\".\nКоманды: /start начать, /restart начать заново, /stop отписаться."),
    ("goal_prompt", "Вы хотите купить, арендовать или инвестировать?"),
    ("ask_budget", "На какой бюджет вы рассчитываете{% if currency %} ({{ currency }}){% endif %}?"),
    ("ask_property_type", "Какой тип недвижимости вас интересует?"),
    ("ask_location", "Какой район вы предпочитаете?"),
    ("ask_bedrooms", "Сколько спален вам нужно?"),
    ("ask_amenities", "Что обязательно должно быть: бассейн, спортзал, парковка?"),
    ("extraction_fallback", "Извините, я не совсем понял. Выберите один из вариантов ниже."),
    ("objection_price", "Понимаю, цена важна. У нас есть варианты в разных бюджетах и гибкие планы оплаты, давайте подберем подходящий."),
    ("objection_timing", "Никакой спешки. Я могу присылать новые предложения, чтобы вы были готовы, когда придет время."),
    ("objection_uncertainty", "Это совершенно нормально. Посмотреть несколько вариантов без обязательств - лучший способ понять, что вам нужно."),
    ("matches_exact", "Подходящие варианты ({{ count }}):"),
    ("matches_widened", "Точных совпадений нет, поэтому я немного расширил бюджет. Вот что нашлось:"),
    ("matches_closest", "Ближайшие альтернативы к вашему бюджету:"),
    ("matches_none", "Сейчас нет объектов в вашем бюджете. Агент свяжется с вами, как только что-то появится."),
    ("match_item", "{{ index }}. {{ title }}: {{ currency }} {{ price | grouped }}, {{ location }}{% if bedrooms > 0 %}, спален: {{ bedrooms }}{% else %}, студия{% endif %}"),
    ("offer_consultation", "Хотите бесплатную консультацию с нашим агентом?"),
    ("consultation_confirmed", "Отлично, агент скоро свяжется с вами, чтобы договориться о консультации."),
    ("request_contact", "Пожалуйста, поделитесь номером телефона, чтобы агент мог с вами связаться."),
    ("contact_received", "Спасибо{% if name %}, {{ name }}{% endif %}! Ваши контакты получены."),
    ("stopped", "Понял, больше не буду писать. Отправьте /start, когда захотите продолжить."),
    ("degraded", "Извините, у нас произошла ошибка. Пожалуйста, попробуйте еще раз чуть позже."),
    ("ghost_reminder", "Здравствуйте{% if name %}, {{ name }}{% endif %}! Вы все еще ищете недвижимость? Появились новые предложения, с радостью покажу подходящие."),
    ("label_buy", "Купить"),
    ("label_rent", "Арендовать"),
    ("label_invest", "Инвестировать"),
    ("label_consult", "Записаться на консультацию"),
    ("label_more", "Еще варианты"),
    ("label_apartment", "Квартира"),
    ("label_villa", "Вилла"),
    ("label_townhouse", "Таунхаус"),
    ("label_penthouse", "Пентхаус"),
    ("label_studio", "Студия"),
    ("label_pool", "Бассейн"),
    ("label_gym", "Спортзал"),
    ("label_parking", "Парковка"),
    ("label_sea_view", "Вид на море"),
];

const ARABIC: &[(&str, &str)] = &[
    ("greeting", "مرحباً! أنا مساعد {{ agency }} العقاري. سأساعدك في العثور على العقار المناسب ببضعة أسئلة سريعة."),
    ("goal_prompt", "هل تبحث عن الشراء أم الإيجار أم الاستثمار؟"),
    ("ask_budget", "ما هي الميزانية التي تفكر بها{% if currency %} ({{ currency }}){% endif %}؟"),
    ("ask_property_type", "ما نوع العقار الذي تبحث عنه؟"),
    ("ask_location", "ما هي المنطقة التي تفضلها؟"),
    ("ask_bedrooms", "كم عدد غرف النوم التي تحتاجها؟"),
    ("ask_amenities", "هل هناك مرافق ضرورية مثل المسبح أو النادي الرياضي أو موقف السيارات؟"),
    ("extraction_fallback", "عذراً، لم أفهم تماماً. يرجى اختيار أحد الخيارات أدناه."),
    ("objection_price", "أتفهم أن السعر مهم. لدينا خيارات بميزانيات مختلفة وخطط دفع مرنة، دعنا نجد ما يناسبك."),
    ("objection_timing", "لا داعي للعجلة. يمكنني إبلاغك بالعروض الجديدة لتكون مستعداً عندما يحين الوقت."),
    ("objection_uncertainty", "هذا طبيعي تماماً. استكشاف بعض الخيارات دون أي التزام هو أفضل طريقة لمعرفة ما تريده."),
    ("matches_exact", "إليك {{ count }} من العقارات المناسبة:"),
    ("matches_widened", "لم أجد تطابقاً تاماً، لذلك وسعت الميزانية قليلاً. إليك ما وجدته:"),
    ("matches_closest", "هذه أقرب البدائل لميزانيتك:"),
    ("matches_none", "لا توجد عقارات ضمن ميزانيتك حالياً. سيتواصل معك أحد الوكلاء فور توفر خيار مناسب."),
    ("offer_consultation", "هل ترغب في استشارة مجانية مع أحد وكلائنا؟"),
    ("consultation_confirmed", "رائع، سيتواصل معك أحد الوكلاء قريباً لترتيب الاستشارة."),
    ("request_contact", "يرجى مشاركة رقم هاتفك ليتمكن الوكيل من التواصل معك."),
    ("contact_received", "شكراً{% if name %} {{ name }}{% endif %}! لقد استلمنا بيانات التواصل الخاصة بك."),
    ("stopped", "حسناً، لن أراسلك مجدداً. أرسل /start متى أردت المتابعة."),
    ("degraded", "عذراً، حدث خطأ من جهتنا. يرجى المحاولة مرة أخرى بعد قليل."),
    ("ghost_reminder", "مرحباً{% if name %} {{ name }}{% endif %}! هل ما زلت تبحث عن عقار؟ لدينا عروض جديدة ويسعدني مشاركة ما يناسبك منها."),
    ("label_buy", "شراء"),
    ("label_rent", "إيجار"),
    ("label_invest", "استثمار"),
    ("label_consult", "احجز استشارة"),
    ("label_more", "خيارات أخرى"),
    ("label_apartment", "شقة"),
    ("label_villa", "فيلا"),
    ("label_townhouse", "تاون هاوس"),
    ("label_penthouse", "بنتهاوس"),
    ("label_studio", "استوديو"),
    ("label_pool", "مسبح"),
    ("label_gym", "نادي رياضي"),
    ("label_parking", "موقف سيارات"),
    ("label_sea_view", "إطلالة بحرية"),
];
