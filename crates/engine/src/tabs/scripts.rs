// ABOUTME: JavaScript sources run inside rendered tabs.
// ABOUTME: Visibility spoofing before page scripts, consent dismissal, and widget extraction.

/// Installed before any page script runs so background tabs report themselves
/// as visible and focused.
pub const VISIBILITY_SPOOF: &str = r#"
(() => {
    const define = (target, name, value) => {
        try {
            Object.defineProperty(target, name, { configurable: true, get: () => value });
        } catch (_) {}
    };
    define(Document.prototype, 'hidden', false);
    define(Document.prototype, 'visibilityState', 'visible');
    define(Document.prototype, 'webkitHidden', false);
    define(Document.prototype, 'webkitVisibilityState', 'visible');
    try { Document.prototype.hasFocus = () => true; } catch (_) {}
    const swallow = (type) => type === 'visibilitychange' || type === 'webkitvisibilitychange' || type === 'blur';
    const original = EventTarget.prototype.addEventListener;
    EventTarget.prototype.addEventListener = function (type, listener, options) {
        if ((this === document || this === window) && swallow(type)) return;
        return original.call(this, type, listener, options);
    };
})();
"#;

/// Clicks the most reject-oriented button inside a visible consent dialog.
/// Returns the clicked button text, or null.
pub const DISMISS_CONSENT: &str = r#"
() => {
    const containers = Array.from(document.querySelectorAll([
        '[id*="consent" i]', '[class*="consent" i]',
        '[id*="cookie" i]', '[class*="cookie" i]',
        '[id*="gdpr" i]', '[class*="gdpr" i]',
        '[id*="privacy" i][role="dialog"]', '[aria-modal="true"]',
        '#onetrust-banner-sdk', '#CybotCookiebotDialog', '.fc-consent-root'
    ].join(',')));
    const visible = (el) => {
        const r = el.getBoundingClientRect();
        const s = window.getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    };
    const reject = ['reject all', 'reject', 'decline', 'refuse', 'deny', 'necessary only', 'only necessary', 'essential only', 'disagree'];
    const accept = ['accept all', 'accept', 'agree', 'allow all', 'allow', 'got it', 'ok', 'i agree', 'continue'];
    const label = (el) => (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().toLowerCase();
    const rank = (text) => {
        const r = reject.findIndex((n) => text === n || text.includes(n));
        if (r >= 0) return r;
        const a = accept.findIndex((n) => text === n || text.startsWith(n));
        return a >= 0 ? 100 + a : -1;
    };
    let best = null;
    for (const container of containers) {
        if (!visible(container)) continue;
        const buttons = container.querySelectorAll('button, [role="button"], a[role="button"], input[type="button"], input[type="submit"]');
        for (const button of buttons) {
            if (!visible(button)) continue;
            const text = label(button);
            if (!text) continue;
            const score = rank(text);
            if (score < 0) continue;
            if (!best || score < best.score) best = { button, score, text };
        }
    }
    if (!best) return null;
    try { best.button.click(); } catch (_) { return null; }
    return best.text;
}
"#;

/// Extracts the widget and measures it in the live page without touching it.
///
/// Arguments: selector, fingerprint (or null). Element indices count the
/// matched element as 0 followed by its descendants in document order.
pub const EXTRACT_WIDGET: &str = r#"
(selector, fingerprint) => {
    const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    let matches = [];
    try { matches = Array.from(document.querySelectorAll(selector)); } catch (_) { matches = []; }
    if (matches.length === 0) return { found: false, matchCount: 0 };
    let el = matches[0];
    if (matches.length > 1 && fingerprint) {
        const fp = norm(fingerprint);
        const hit = matches.find((m) => norm(m.innerText || m.textContent).includes(fp));
        if (hit) el = hit;
    }
    const all = [el, ...el.querySelectorAll('*')];
    const hidden = [];
    const images = [];
    all.forEach((node, index) => {
        const style = window.getComputedStyle(node);
        if (index > 0 && style.display === 'none') hidden.push(index);
        if (node.tagName === 'IMG') {
            const rect = node.getBoundingClientRect();
            const container = node.closest('article, section') || node.parentElement || el;
            const crect = container.getBoundingClientRect();
            images.push({
                index,
                width: rect.width,
                height: rect.height,
                containerWidth: crect.width,
                containerHeight: crect.height,
                src: node.currentSrc || node.src || ''
            });
        }
    });
    return {
        found: true,
        matchCount: matches.length,
        html: el.outerHTML,
        elementCount: all.length,
        hidden,
        images
    };
}
"#;
