use psync_core::SheetInput;

use crate::{
    DetailRules, FieldRule, LabelRule, ListingRules, PairLayout, PairRule, SiteRules, TagListRule,
    Transform, ValueSource,
};

const SHEET_DETAIL_COLUMNS: &[&str] = &[
    "age", "height", "cup", "face", "toy", "appear", "style", "job", "hobby", "favor", "seikantai",
    "genre",
];

const SHEET_COLUMNS: &[&str] = &[
    "name", "image", "url", "comment", "age", "height", "cup", "face", "toy", "appear", "style",
    "job", "hobby", "favor", "seikantai", "genre",
];

/// Column layout shared by the variants posting to the ingestion API.
const API_COLUMNS: &[&str] = &[
    "name",
    "samune",
    "url",
    "oneword",
    "age",
    "height",
    "cup",
    "face_public",
    "toy",
    "time_slot",
    "style",
    "job",
    "hobby",
    "favorite_type",
    "erogenous_zone",
    "genre",
];

const API_DETAIL_COLUMNS: &[&str] = &[
    "age",
    "height",
    "cup",
    "face_public",
    "toy",
    "time_slot",
    "style",
    "job",
    "hobby",
    "favorite_type",
    "erogenous_zone",
    "genre",
];

const PROFILE_CONTAINER: &str = ".profile, .cast-profile, .profile-box";

const PROFILE_PAIRS: &[PairRule] = &[
    PairRule {
        scope: Some(PROFILE_CONTAINER),
        layout: PairLayout::Rows {
            row: "dl",
            label: "dt",
            value: "dd",
        },
    },
    PairRule {
        scope: Some(PROFILE_CONTAINER),
        layout: PairLayout::Rows {
            row: "tr",
            label: "th",
            value: "td",
        },
    },
];

// Order matters: the first rule whose keyword appears in the label wins.
const PROFILE_LABELS: &[LabelRule] = &[
    LabelRule::contains("age", &["年齢", "歳", "才"]),
    LabelRule::contains("height", &["身長", "cm"]),
    LabelRule::contains("cup", &["カップ", "バスト"]),
    LabelRule::contains("face_public", &["顔出し", "顔", "公開"]),
    LabelRule::contains("toy", &["おもちゃ", "玩具"]),
    LabelRule::contains("time_slot", &["出没時間", "時間"]),
    LabelRule::contains("style", &["スタイル"]),
    LabelRule::contains("job", &["職業"]),
    LabelRule::contains("hobby", &["趣味"]),
    LabelRule::contains("favorite_type", &["好みのタイプ", "好きなタイプ"]),
    LabelRule::contains("erogenous_zone", &["性感帯"]),
];

const PROFILE_LABELS_WITH_GENRE: &[LabelRule] = &[
    LabelRule::contains("age", &["年齢", "歳", "才"]),
    LabelRule::contains("height", &["身長", "cm"]),
    LabelRule::contains("cup", &["カップ", "バスト"]),
    LabelRule::contains("face_public", &["顔出し", "顔", "公開"]),
    LabelRule::contains("toy", &["おもちゃ", "玩具"]),
    LabelRule::contains("time_slot", &["出没時間", "時間"]),
    LabelRule::contains("style", &["スタイル"]),
    LabelRule::contains("job", &["職業"]),
    LabelRule::contains("hobby", &["趣味"]),
    LabelRule::contains("favorite_type", &["好みのタイプ", "好きなタイプ"]),
    LabelRule::contains("erogenous_zone", &["性感帯"]),
    LabelRule::contains("genre", &["ジャンル", "タイプ"]),
];

const PROFILE_TAGS: &[TagListRule] = &[TagListRule {
    column: "genre",
    scope: Some(PROFILE_CONTAINER),
    selector: ".tag, .genre, .badge",
    separator: ", ",
}];

const PROFILE_SELECTORS: &[FieldRule] = &[
    FieldRule::text("age", ".age"),
    FieldRule::text("height", ".height"),
    FieldRule::text("cup", ".cup"),
    FieldRule::text("face_public", ".face"),
];

const PROFILE_FALLBACK: &[&str] = &["age", "height", "cup", "face_public"];

pub static DMM: SiteRules = SiteRules {
    site_id: "dmm",
    display_name: "DMM Live Chat",
    default_listing_url: Some("https://www.dmm.co.jp/live/chat/"),
    default_sheet_name: "fanza",
    sheet_input: SheetInput::Raw,
    columns: &[
        "name",
        "image",
        "url",
        "comment",
        "genre",
        "height",
        "three_size",
        "birthday",
        "blood_type",
        "region",
        "job",
        "feature",
        "type",
        "hobby",
        "personality",
        "lookalike",
    ],
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &["li.CharacterItem"],
        fields: &[
            FieldRule::text("name", ".CharacterItem__name"),
            FieldRule {
                column: "image",
                selector: Some("img.CharacterItem__img"),
                source: ValueSource::Attr("src"),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule::link("url", "a.CharacterItem__anchor"),
            FieldRule::text("comment", ".CharacterItem__comment"),
        ],
        required: &[],
    },
    detail: Some(DetailRules {
        columns: &[
            "genre",
            "height",
            "three_size",
            "birthday",
            "blood_type",
            "region",
            "job",
            "feature",
            "type",
            "hobby",
            "personality",
            "lookalike",
        ],
        pairs: &[PairRule {
            scope: Some("table.cg-data-set"),
            layout: PairLayout::Rows {
                row: "tr",
                label: "th",
                value: "td",
            },
        }],
        labels: &[
            LabelRule::exact("genre", &["ジャンル"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("height", &["身長"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("three_size", &["スリーサイズ"])
                .with(&[Transform::StripLeadingColon]),
            LabelRule::exact("birthday", &["誕生日"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("blood_type", &["血液型"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("region", &["地域"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("job", &["職業"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("feature", &["特徴"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("type", &["タイプ"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("hobby", &["趣味"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("personality", &["性格"]).with(&[Transform::StripLeadingColon]),
            LabelRule::exact("lookalike", &["似てる人"]).with(&[Transform::StripLeadingColon]),
        ],
        tag_lists: &[],
        selectors: &[],
        labelled_fallback: &[],
    }),
    defaults: &[],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: None,
    render_wait_selector: Some("li.CharacterItem"),
};

pub static MADAM: SiteRules = SiteRules {
    site_id: "madam",
    display_name: "Madam Live (sheet)",
    default_listing_url: Some("https://madamlive.tv/listing"),
    default_sheet_name: "madam",
    sheet_input: SheetInput::Raw,
    columns: SHEET_COLUMNS,
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &["a[href]"],
        fields: &[
            FieldRule {
                column: "name",
                selector: None,
                source: ValueSource::Text,
                transforms: &[],
            },
            FieldRule {
                column: "image",
                selector: Some("img"),
                source: ValueSource::Attr("src"),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule {
                column: "url",
                selector: None,
                source: ValueSource::Attr("href"),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule::text("comment", "[class*=oneword], [class*=comment]"),
        ],
        required: &["name", "image"],
    },
    detail: Some(DetailRules {
        columns: SHEET_DETAIL_COLUMNS,
        pairs: &[PairRule {
            scope: None,
            layout: PairLayout::LabelNext {
                label: "dt",
                value: "dd",
            },
        }],
        labels: &[
            LabelRule::contains("age", &["年齢"]),
            LabelRule::contains("height", &["身長"]),
            LabelRule::contains("cup", &["カップ数"]),
            LabelRule::contains("face", &["顔出し"]),
            LabelRule::contains("toy", &["おもちゃ"]),
            LabelRule::contains("appear", &["出没時間"]),
            LabelRule::contains("style", &["スタイル"]),
            LabelRule::contains("job", &["職業"]),
            LabelRule::contains("hobby", &["趣味"]),
            LabelRule::contains("favor", &["好みのタイプ"]),
            LabelRule::contains("seikantai", &["性感帯"]),
            LabelRule::contains("genre", &["ジャンル"]),
        ],
        tag_lists: &[],
        selectors: &[],
        labelled_fallback: &[],
    }),
    defaults: &[],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: None,
    render_wait_selector: None,
};

pub static LIVE: SiteRules = SiteRules {
    site_id: "live",
    display_name: "Live chat (sheet)",
    default_listing_url: None,
    default_sheet_name: "live",
    sheet_input: SheetInput::Raw,
    columns: SHEET_COLUMNS,
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &["a[href]"],
        fields: &[
            FieldRule::text("name", "h3 > b.bold"),
            FieldRule::background("image", "li.image span[style]"),
            FieldRule {
                column: "url",
                selector: None,
                source: ValueSource::Attr("href"),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule::text("comment", "li.taiki_comment"),
        ],
        required: &["name"],
    },
    detail: Some(DetailRules {
        columns: SHEET_DETAIL_COLUMNS,
        pairs: &[],
        labels: &[],
        tag_lists: &[TagListRule {
            column: "genre",
            scope: Some("dd.genre-list"),
            selector: "div.genre-div",
            separator: ",",
        }],
        selectors: &[
            FieldRule::text("age", "dd.p-age"),
            FieldRule::text("height", "dd.p-height"),
            FieldRule::text("cup", "dd.p-cup"),
            FieldRule::text("face", "dd.p-face"),
            FieldRule::text("toy", "dd.p-toy"),
            FieldRule::text("appear", "dd.p-appear"),
            FieldRule::text("style", "dd.p-style"),
            FieldRule::text("job", "dd.p-job"),
            FieldRule::text("hobby", "dd.p-hobby"),
            FieldRule::text("favor", "dd.p-favor"),
            FieldRule::text("seikantai", "dd.p-seikantai"),
        ],
        labelled_fallback: &[],
    }),
    defaults: &[],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: None,
    render_wait_selector: Some("h3 > b.bold"),
};

pub static JEWEL_LIVE: SiteRules = SiteRules {
    site_id: "jewel-live",
    display_name: "Jewel Live",
    default_listing_url: Some("https://www.j-live.tv/"),
    default_sheet_name: "jewel_live",
    sheet_input: SheetInput::UserEntered,
    columns: &["name", "image", "url", "comment", "viewers", "event"],
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &["li.online-girl.party"],
        fields: &[
            FieldRule::text("name", "li.nick_name h3 b"),
            FieldRule::background("image", "li.image span[style]"),
            FieldRule::link("url", "a[href]"),
            FieldRule::text("comment", "li.taiki_comment"),
            FieldRule::text("viewers", "li.shityo span"),
            FieldRule::text("event", "li.newface_str"),
        ],
        required: &[],
    },
    detail: None,
    defaults: &[],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: Some("jewel_live_profiles"),
    render_wait_selector: Some("li.online-girl"),
};

pub static ANGEL_LIVE: SiteRules = SiteRules {
    site_id: "angel-live",
    display_name: "Angel Live",
    default_listing_url: Some("https://www.angel-live.com/home/"),
    default_sheet_name: "angel_live",
    sheet_input: SheetInput::Raw,
    columns: API_COLUMNS,
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &["li.girl-line__item", "li"],
        fields: &[
            FieldRule::text("name", "h3.girl-prof__name, .girl-prof__name, h3, h4"),
            FieldRule::background("samune", ".girl-pic__image[style]"),
            FieldRule::link("url", "a.girl-link[href]"),
            FieldRule::link("url", "a[href]"),
            FieldRule::text("oneword", "div.girl-comment p.girl-comment__txt, .girl-comment__txt"),
        ],
        required: &["name"],
    },
    detail: Some(DetailRules {
        columns: API_DETAIL_COLUMNS,
        pairs: PROFILE_PAIRS,
        labels: PROFILE_LABELS,
        tag_lists: PROFILE_TAGS,
        selectors: PROFILE_SELECTORS,
        labelled_fallback: PROFILE_FALLBACK,
    }),
    defaults: &[("genre", "Angel Live")],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: None,
    render_wait_selector: Some("li.girl-line__item"),
};

pub static MADAM_LIVE: SiteRules = SiteRules {
    site_id: "madam-live",
    display_name: "Madam Live",
    default_listing_url: Some("https://www.madamlive.tv/"),
    default_sheet_name: "madam_live",
    sheet_input: SheetInput::Raw,
    columns: API_COLUMNS,
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &[
            "div.cast-box",
            "li.cast",
            "div.card",
            "dl.onlinegirl-dl-big",
            "dl.onlinegirl-dl",
            "dl[id^='stat_']",
            "section a[href]",
        ],
        fields: &[
            FieldRule::text(
                "name",
                ".name, .nickname, .user_name, .user-name, .nick, .nick_name, h3, h4, p.name, \
                 .live-name, span.onlinegirl-dt-name-span-big h3 a, \
                 span.onlinegirl-dt-name-span-big a",
            ),
            FieldRule {
                column: "samune",
                selector: Some("img"),
                source: ValueSource::FirstAttr(&["src", "data-src", "data-original"]),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule::background("samune", "[style*='url(']"),
            FieldRule::link("url", "a[href]"),
            FieldRule {
                column: "url",
                selector: None,
                source: ValueSource::Attr("href"),
                transforms: &[Transform::ResolveUrl],
            },
            FieldRule::text(
                "oneword",
                ".comment, .message, .tagline, .catch, .live-comment, p.comment, \
                 span.onlinegirl-dd-comment-span-big, .onlinegirl-dd-comment-span-big a",
            ),
        ],
        required: &[],
    },
    detail: Some(DetailRules {
        columns: API_DETAIL_COLUMNS,
        pairs: PROFILE_PAIRS,
        labels: PROFILE_LABELS_WITH_GENRE,
        tag_lists: PROFILE_TAGS,
        selectors: PROFILE_SELECTORS,
        labelled_fallback: PROFILE_FALLBACK,
    }),
    defaults: &[("genre", "Madam Live")],
    placeholder: None,
    warm_up_url: None,
    extra_headers: &[],
    mirror_table: None,
    render_wait_selector: None,
};

pub static CHATPIA: SiteRules = SiteRules {
    site_id: "chatpia",
    display_name: "Chatpia",
    default_listing_url: Some("https://www.chatpia.jp/main.php"),
    default_sheet_name: "chatpia",
    sheet_input: SheetInput::Raw,
    columns: API_COLUMNS,
    identifier_column: "url",
    listing: ListingRules {
        card_selectors: &[
            "div.chatbox_big, div.chatbox_small",
            "div.chatbox_big, div.chatbox-box, div.line",
        ],
        fields: &[
            FieldRule::text("name", ".name a").with(&[Transform::SanitizeName]),
            FieldRule::background("samune", ".pict[style]"),
            FieldRule::link("url", ".name a[href]"),
            FieldRule::text("oneword", ".hitokoto, .hitokoto_taiki, .hitokoto_new"),
            FieldRule::text("age", ".name").with(&[Transform::Digits]),
        ],
        required: &["samune", "oneword"],
    },
    detail: Some(DetailRules {
        columns: &["height", "cup", "job", "hobby", "favorite_type", "time_slot"],
        pairs: &[PairRule {
            scope: Some("section.life-status"),
            layout: PairLayout::LabelNext {
                label: "dt.life-status-detail__title",
                value: "dd.life-status-detail__data",
            },
        }],
        labels: &[
            LabelRule::contains("height", &["身長"]),
            LabelRule::contains("cup", &["スリーサイズ"]).with(&[Transform::CupSize]),
            LabelRule::contains("job", &["職業"]),
            LabelRule::contains("hobby", &["趣味"]),
            LabelRule::contains("favorite_type", &["男性のタイプ"]),
            LabelRule::contains("time_slot", &["出没時間"]),
        ],
        tag_lists: &[],
        selectors: &[],
        labelled_fallback: &[],
    }),
    defaults: &[("genre", "Chatpia")],
    placeholder: Some("-"),
    warm_up_url: Some("https://www.chatpia.jp/"),
    extra_headers: &[
        ("Accept-Language", "ja,en-US;q=0.9,en;q=0.8"),
        ("Referer", "https://www.chatpia.jp/"),
    ],
    mirror_table: None,
    render_wait_selector: Some("div.chatbox_big"),
};

static ALL: [&SiteRules; 7] = [
    &DMM,
    &MADAM,
    &LIVE,
    &JEWEL_LIVE,
    &ANGEL_LIVE,
    &MADAM_LIVE,
    &CHATPIA,
];

pub fn all_sites() -> &'static [&'static SiteRules] {
    &ALL
}

pub fn site_rules(site_id: &str) -> Option<&'static SiteRules> {
    let wanted = site_id.trim().to_ascii_lowercase().replace('_', "-");
    ALL.iter().copied().find(|rules| rules.site_id == wanted)
}
