//! Stopword and noise-term tables shared by extraction and query analysis

pub const EN_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "this", "that", "into", "then", "than", "are", "is",
    "was", "were", "what", "when", "where", "who", "why", "how", "can", "will", "should",
    "could", "would", "use", "using", "used", "data", "model", "has", "have", "had", "not",
    "but", "all", "any", "its", "his", "her", "their", "they", "them", "there", "these",
    "those", "which", "while", "also", "been", "being", "onto", "over", "under", "about",
    "after", "before", "each", "other", "some", "such", "only", "very", "more", "most", "our",
    "your", "you", "she", "him", "one", "does", "did", "doing", "just", "like", "tell", "please",
    "of", "to", "in", "on", "at", "by", "as", "an", "or", "be", "it", "we", "do", "if", "so",
    "no", "up", "he", "me", "my", "us",
];

pub const ZH_STOPWORDS: &[&str] = &[
    "我们", "你们", "他们", "这些", "那些", "这个", "那个", "以及", "或者", "可以", "进行",
    "因为", "所以", "通过", "如果", "然后", "其中", "一种", "什么", "怎么", "如何", "为什么",
    "时候", "地方", "人们", "大家", "自己", "没有", "有的", "还有", "一些", "其他", "可能",
];

/// Question scaffolding that carries no topical signal
pub const QUERY_NOISE_TERMS: &[&str] = &[
    "几个", "多少", "哪些", "什么", "为何", "为什么", "怎么", "如何", "是否", "请问", "一下",
    "一下子", "explain", "describe", "question", "answer",
];

/// Trailing fragments that mark a CJK span as a verb phrase rather than a name
pub const ENTITY_SUFFIX_BLACKLIST: &[&str] = &[
    "说", "道", "曰", "表示", "指出", "强调", "提出", "要求", "希望", "介绍", "说明", "解释",
    "告诉", "觉得", "发现", "看到", "听到", "起来", "下来", "过来", "回来", "出去", "开始",
    "结束", "继续", "时候", "地方", "意思", "情况", "样子", "东西", "事情", "问题", "之后",
    "以前", "以后",
];

/// Single characters that separate CJK content words
pub const CJK_FUNCTION_CHARS: &[char] = &[
    '的', '是', '在', '了', '和', '与', '或', '有', '又', '也', '就', '都', '而', '及', '着',
    '被', '把', '让', '给', '向', '从', '到', '对', '于', '为', '以', '这', '那', '我', '你',
    '他', '她', '它', '们', '吗', '呢', '吧', '啊', '之', '其', '很', '还', '并', '但', '却',
    '只', '等', '将', '已',
];
